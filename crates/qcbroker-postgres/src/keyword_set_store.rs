//! Postgres-backed `KeywordSetStore`. Same content-addressed
//! upsert shape as `PgMoleculeStore`.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::hashing;
use qcbroker_core::ports::KeywordSetStore;
use qcbroker_types::KeywordSet;

pub struct PgKeywordSetStore {
    pool: PgPool,
}

impl PgKeywordSetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeywordSetStore for PgKeywordSetStore {
    async fn add_keyword_set(&self, keywords: &KeywordSet) -> Result<i64> {
        let hash = hashing::keyword_set_hash(keywords);
        let body = serde_json::to_value(keywords).map_err(|e| BrokerError::internal(anyhow!(e)))?;

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO qcbroker.keyword_sets (content_hash, body)
            VALUES ($1, $2)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&hash)
        .bind(&body)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        match inserted {
            Some(id) => Ok(id),
            None => sqlx::query_scalar::<_, i64>(
                "SELECT id FROM qcbroker.keyword_sets WHERE content_hash = $1",
            )
            .bind(&hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e))),
        }
    }

    async fn get_keyword_set(&self, id: i64) -> Result<Option<KeywordSet>> {
        let body = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT body FROM qcbroker.keyword_sets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        body.map(|b| serde_json::from_value(b).map_err(|e| BrokerError::internal(anyhow!(e))))
            .transpose()
    }
}
