//! Postgres-backed `BlobStorePort`. Bytes live in a plain `BYTEA` column; compression, if any, has
//! already happened by the time `put` is called (the `compressed` flag is
//! bookkeeping only, mirroring `qcbroker_types::BlobMeta`).

use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::ports::BlobStorePort;
use qcbroker_types::{BlobMeta, BlobPayload, ContentType};

pub struct PgBlobStore {
    pool: PgPool,
}

impl PgBlobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlobStorePort for PgBlobStore {
    async fn put(&self, content_type: ContentType, bytes: Vec<u8>, compress: bool) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO qcbroker.blobs (content_type, compressed, bytes) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(content_type)
        .bind(compress)
        .bind(&bytes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<BlobPayload>> {
        let row = sqlx::query_as::<_, (ContentType, Vec<u8>)>(
            "SELECT content_type, bytes FROM qcbroker.blobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(row.map(|(content_type, data)| BlobPayload { content_type, data }))
    }

    async fn meta(&self, id: i64) -> Result<Option<BlobMeta>> {
        let row = sqlx::query_as::<_, (ContentType, bool, i64)>(
            "SELECT content_type, compressed, octet_length(bytes) FROM qcbroker.blobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(row.map(|(content_type, compressed, size_bytes)| BlobMeta {
            id,
            content_type,
            compressed,
            size_bytes: size_bytes as u64,
        }))
    }

    async fn append_text(&self, id: Option<i64>, line: &str) -> Result<i64> {
        let mut appended = format!("{line}\n").into_bytes();
        match id {
            Some(id) => {
                let result = sqlx::query(
                    "UPDATE qcbroker.blobs SET bytes = bytes || $2 WHERE id = $1",
                )
                .bind(id)
                .bind(&appended)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
                if result.rows_affected() == 0 {
                    return self.put(ContentType::Text, std::mem::take(&mut appended), false).await;
                }
                Ok(id)
            }
            None => self.put(ContentType::Text, appended, false).await,
        }
    }
}
