//! Postgres-backed `ServiceQueuePort`. `due` mirrors
//! `testutil`'s three-way filter (due timestamp, record status, pending
//! children terminal) entirely in SQL so the Internal Job Runner never has
//! to page through non-candidates.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::ports::{ServiceQueuePort, ServiceRow};
use qcbroker_types::Priority;

pub struct PgServiceQueue {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ServiceCols {
    record_id: i64,
    tag: String,
    priority: Priority,
    iterate_state: serde_json::Value,
    pending_children: Vec<i64>,
    iteration: i32,
    next_iteration_due_at: DateTime<Utc>,
}

impl From<ServiceCols> for ServiceRow {
    fn from(c: ServiceCols) -> Self {
        Self {
            record_id: c.record_id,
            tag: c.tag,
            priority: c.priority,
            iterate_state: c.iterate_state,
            pending_children: c.pending_children,
            iteration: c.iteration as u32,
            next_iteration_due_at: c.next_iteration_due_at,
        }
    }
}

const SERVICE_COLUMNS: &str =
    "record_id, tag, priority, iterate_state, pending_children, iteration, next_iteration_due_at";

impl PgServiceQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceQueuePort for PgServiceQueue {
    async fn create(&self, record_id: i64, tag: &str, priority: Priority, initial_state: serde_json::Value) -> Result<()> {
        sqlx::query(
            "INSERT INTO qcbroker.services (record_id, tag, priority, iterate_state) VALUES ($1, $2, $3, $4)",
        )
        .bind(record_id)
        .bind(tag)
        .bind(priority)
        .bind(&initial_state)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn get(&self, record_id: i64) -> Result<Option<ServiceRow>> {
        let cols = sqlx::query_as::<_, ServiceCols>(&format!(
            "SELECT {SERVICE_COLUMNS} FROM qcbroker.services WHERE record_id = $1"
        ))
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(cols.map(ServiceRow::from))
    }

    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ServiceRow>> {
        let cols = sqlx::query_as::<_, ServiceCols>(&format!(
            r#"
            SELECT {SERVICE_COLUMNS}
            FROM qcbroker.services s
            JOIN qcbroker.records r ON r.id = s.record_id
            WHERE s.next_iteration_due_at <= $1
              AND r.status IN ('waiting', 'running')
              AND NOT EXISTS (
                  SELECT 1 FROM unnest(s.pending_children) pc(child_id)
                  WHERE NOT EXISTS (
                      SELECT 1 FROM qcbroker.records r2
                      WHERE r2.id = pc.child_id
                        AND r2.status IN ('complete', 'invalid', 'cancelled', 'deleted')
                  )
              )
            ORDER BY s.record_id
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(cols.into_iter().map(ServiceRow::from).collect())
    }

    async fn update_state(
        &self,
        record_id: i64,
        new_state: serde_json::Value,
        new_children: Vec<i64>,
        next_due_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE qcbroker.services
            SET iterate_state = $2, pending_children = $3, iteration = iteration + 1, next_iteration_due_at = $4
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .bind(&new_state)
        .bind(&new_children)
        .bind(next_due_at)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::NotFound(format!("service {record_id}")));
        }
        Ok(())
    }

    async fn remove(&self, record_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM qcbroker.services WHERE record_id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }
}
