//! Postgres-backed `ManagerRegistryPort`.

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::ports::ManagerRegistryPort;
use qcbroker_types::{ManagerStatus, ManagerSummary, RegisterManagerRequest};

pub struct PgManagerRegistry {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ManagerCols {
    id: i64,
    name: String,
    cluster: String,
    hostname: String,
    version: String,
    tags: Vec<String>,
    programs: serde_json::Value,
    status: ManagerStatus,
    last_heartbeat: DateTime<Utc>,
    claimed_count: i64,
    completed_count: i64,
    failed_count: i64,
}

const MANAGER_COLUMNS: &str = "id, name, cluster, hostname, version, tags, programs, status, \
     last_heartbeat, claimed_count, completed_count, failed_count";

impl TryFrom<ManagerCols> for ManagerSummary {
    type Error = BrokerError;

    fn try_from(c: ManagerCols) -> Result<Self> {
        let programs: BTreeMap<String, String> =
            serde_json::from_value(c.programs).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(Self {
            id: c.id,
            name: c.name,
            cluster: c.cluster,
            hostname: c.hostname,
            version: c.version,
            tags: c.tags,
            programs,
            status: c.status,
            last_heartbeat: c.last_heartbeat,
            claimed_count: c.claimed_count as u64,
            completed_count: c.completed_count as u64,
            failed_count: c.failed_count as u64,
        })
    }
}

impl PgManagerRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ManagerRegistryPort for PgManagerRegistry {
    async fn register(&self, request: RegisterManagerRequest) -> Result<i64> {
        let programs =
            serde_json::to_value(&request.programs).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO qcbroker.managers (name, cluster, hostname, version, tags, programs)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO UPDATE
                SET cluster = excluded.cluster,
                    hostname = excluded.hostname,
                    version = excluded.version,
                    tags = excluded.tags,
                    programs = excluded.programs,
                    status = 'active',
                    last_heartbeat = now()
            RETURNING id
            "#,
        )
        .bind(&request.name)
        .bind(&request.cluster)
        .bind(&request.hostname)
        .bind(&request.version)
        .bind(&request.tags)
        .bind(&programs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(id)
    }

    async fn record_heartbeat(&self, name: &str, _status_counts: &BTreeMap<String, u64>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE qcbroker.managers SET last_heartbeat = now(), status = 'active' WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::ManagerUnknown(name.to_string()));
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ManagerSummary>> {
        let cols = sqlx::query_as::<_, ManagerCols>(&format!(
            "SELECT {MANAGER_COLUMNS} FROM qcbroker.managers WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        cols.map(ManagerSummary::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<ManagerSummary>> {
        let cols = sqlx::query_as::<_, ManagerCols>(&format!(
            "SELECT {MANAGER_COLUMNS} FROM qcbroker.managers ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        cols.into_iter().map(ManagerSummary::try_from).collect()
    }

    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ManagerSummary>> {
        let cols = sqlx::query_as::<_, ManagerCols>(&format!(
            r#"
            UPDATE qcbroker.managers
            SET status = 'inactive'
            WHERE status = 'active' AND last_heartbeat < $1
            RETURNING {MANAGER_COLUMNS}
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        cols.into_iter().map(ManagerSummary::try_from).collect()
    }

    async fn record_claim(&self, name: &str, count: u64) -> Result<()> {
        sqlx::query("UPDATE qcbroker.managers SET claimed_count = claimed_count + $2 WHERE name = $1")
            .bind(name)
            .bind(count as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn record_completion(&self, name: &str, succeeded: bool) -> Result<()> {
        let column = if succeeded { "completed_count" } else { "failed_count" };
        sqlx::query(&format!("UPDATE qcbroker.managers SET {column} = {column} + 1 WHERE name = $1"))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }
}
