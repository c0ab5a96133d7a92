//! Postgres-backed `SpecificationStore`. `record_type` is
//! denormalized onto its own column purely for indexable admin queries;
//! the tagged `Specification` enum round-trips through `body` alone.

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::hashing;
use qcbroker_core::ports::SpecificationStore;
use qcbroker_types::Specification;

pub struct PgSpecificationStore {
    pool: PgPool,
}

impl PgSpecificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SpecificationStore for PgSpecificationStore {
    async fn add_specification(&self, spec: &Specification) -> Result<i64> {
        let hash = hashing::spec_hash(spec);
        let body = serde_json::to_value(spec).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let record_type = spec.record_type().as_str();

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO qcbroker.specifications (content_hash, record_type, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&hash)
        .bind(record_type)
        .bind(&body)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        match inserted {
            Some(id) => Ok(id),
            None => sqlx::query_scalar::<_, i64>(
                "SELECT id FROM qcbroker.specifications WHERE content_hash = $1",
            )
            .bind(&hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e))),
        }
    }

    async fn get_specification(&self, id: i64) -> Result<Option<Specification>> {
        let body = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT body FROM qcbroker.specifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        body.map(|b| serde_json::from_value(b).map_err(|e| BrokerError::internal(anyhow!(e))))
            .transpose()
    }
}
