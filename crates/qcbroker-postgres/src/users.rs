//! Bearer-token principal store backing `qcbroker-web`'s auth layer and the
//! `qcbroker-server user` CLI. Not one of
//! `qcbroker-core::ports`' port traits — the rest of the engine never
//! depends on identity, only the web layer and CLI do.

use std::collections::BTreeSet;

use anyhow::anyhow;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::principal::{Permission, Principal};

pub struct PgUserStore {
    pool: PgPool,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_permission(s: &str) -> Option<Permission> {
    match s {
        "read" => Some(Permission::Read),
        "write" => Some(Permission::Write),
        "compute" => Some(Permission::Compute),
        "queue" => Some(Permission::Queue),
        "admin" => Some(Permission::Admin),
        _ => None,
    }
}

fn to_permission_set(raw: &[String]) -> BTreeSet<Permission> {
    raw.iter().filter_map(|s| parse_permission(s)).collect()
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, username: &str, token: &str, permissions: &BTreeSet<Permission>) -> Result<()> {
        let token_hash = hash_token(token);
        let perms: Vec<&'static str> = permissions.iter().map(Permission::as_str).collect();
        sqlx::query(
            "INSERT INTO qcbroker.users (username, token_hash, permissions) VALUES ($1, $2, $3)",
        )
        .bind(username)
        .bind(&token_hash)
        .bind(&perms)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    /// Resolves a bearer token to its `Principal`, or `None` if unknown.
    pub async fn resolve(&self, token: &str) -> Result<Option<Principal>> {
        let token_hash = hash_token(token);
        let row = sqlx::query_as::<_, (String, Vec<String>)>(
            "SELECT username, permissions FROM qcbroker.users WHERE token_hash = $1",
        )
        .bind(&token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(row.map(|(username, permissions)| Principal::new(username, to_permission_set(&permissions))))
    }

    pub async fn get_permissions(&self, username: &str) -> Result<Option<BTreeSet<Permission>>> {
        let permissions = sqlx::query_scalar::<_, Vec<String>>(
            "SELECT permissions FROM qcbroker.users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(permissions.map(|p| to_permission_set(&p)))
    }

    pub async fn set_permissions(&self, username: &str, permissions: &BTreeSet<Permission>) -> Result<()> {
        let perms: Vec<&'static str> = permissions.iter().map(Permission::as_str).collect();
        let result = sqlx::query("UPDATE qcbroker.users SET permissions = $2 WHERE username = $1")
            .bind(username)
            .bind(&perms)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::NotFound(format!("user {username}")));
        }
        Ok(())
    }

    pub async fn reset_token(&self, username: &str, token: &str) -> Result<()> {
        let token_hash = hash_token(token);
        let result = sqlx::query("UPDATE qcbroker.users SET token_hash = $2 WHERE username = $1")
            .bind(username)
            .bind(&token_hash)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::NotFound(format!("user {username}")));
        }
        Ok(())
    }

    pub async fn remove(&self, username: &str) -> Result<()> {
        sqlx::query("DELETE FROM qcbroker.users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>("SELECT username FROM qcbroker.users ORDER BY username")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(names)
    }
}
