//! Postgres-backed `TaskQueuePort`. `claim` is the one
//! operation in this crate that must be a single serialized step: it runs
//! inside a transaction, locks every eligible row with
//! `FOR UPDATE SKIP LOCKED`, then applies the program-version match in
//! Rust before committing the lease.

use std::collections::BTreeMap;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::ports::{EnqueueTask, ReturnOutcome, TaskQueuePort};
use qcbroker_types::{ClaimedTask, ComputeHistoryEntry, ComputeOutcome, Priority, ProgramRequirement, TaskReturn, WILDCARD_TAG};

const LEASE_SECONDS: i64 = 180;

pub struct PgTaskQueue {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CandidateRow {
    record_id: i64,
    priority: Priority,
    created_at: DateTime<Utc>,
    payload: serde_json::Value,
    required_programs: serde_json::Value,
    required_capabilities: serde_json::Value,
}

fn version_satisfies(declared: &str, required: &Option<String>) -> bool {
    let Some(required) = required else {
        return true;
    };
    let parse = |s: &str| -> Vec<u64> { s.split('.').filter_map(|p| p.parse::<u64>().ok()).collect() };
    parse(declared) >= parse(required)
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueuePort for PgTaskQueue {
    async fn enqueue(&self, task: EnqueueTask) -> Result<i64> {
        let required_programs = serde_json::to_value(&task.required_programs)
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let required_capabilities = serde_json::to_value(&task.required_capabilities)
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        sqlx::query(
            r#"
            INSERT INTO qcbroker.tasks
                (record_id, tag, priority, required_programs, required_capabilities, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(task.record_id)
        .bind(&task.tag)
        .bind(task.priority)
        .bind(&required_programs)
        .bind(&required_capabilities)
        .bind(&task.payload)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(task.record_id)
    }

    async fn claim(
        &self,
        manager_name: &str,
        tags: &[String],
        programs: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<ClaimedTask>> {
        let mut tx = self.pool.begin().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let wildcard_in_tags = tags.iter().any(|t| t == WILDCARD_TAG);

        let candidates = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT t.record_id, t.priority, t.created_at, t.payload,
                   t.required_programs, t.required_capabilities
            FROM qcbroker.tasks t
            JOIN qcbroker.records r ON r.id = t.record_id
            WHERE r.status = 'waiting'
              AND t.manager_name IS NULL
              AND (t.tag = ANY($1) OR ($2 AND t.tag <> $3))
            ORDER BY t.priority DESC, t.created_at ASC
            FOR UPDATE OF t SKIP LOCKED
            "#,
        )
        .bind(tags)
        .bind(wildcard_in_tags)
        .bind(WILDCARD_TAG)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        let mut chosen = Vec::with_capacity(limit as usize);
        for row in candidates {
            if chosen.len() >= limit as usize {
                break;
            }
            let required_programs: Vec<ProgramRequirement> =
                serde_json::from_value(row.required_programs.clone())
                    .map_err(|e| BrokerError::internal(anyhow!(e)))?;
            let programs_ok = required_programs.iter().all(|req| {
                programs
                    .get(&req.name)
                    .is_some_and(|declared| version_satisfies(declared, &req.min_version))
            });
            if !programs_ok {
                continue;
            }
            chosen.push(row);
        }

        if chosen.is_empty() {
            tx.commit().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;
            return Ok(Vec::new());
        }

        let lease_deadline = Utc::now() + Duration::seconds(LEASE_SECONDS);
        let chosen_ids: Vec<i64> = chosen.iter().map(|c| c.record_id).collect();

        sqlx::query(
            "UPDATE qcbroker.tasks SET manager_name = $2, lease_deadline = $3 WHERE record_id = ANY($1)",
        )
        .bind(&chosen_ids)
        .bind(manager_name)
        .bind(lease_deadline)
        .execute(&mut *tx)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        sqlx::query("UPDATE qcbroker.records SET manager_name = $2 WHERE id = ANY($1)")
            .bind(&chosen_ids)
            .bind(manager_name)
            .execute(&mut *tx)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        tx.commit().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;

        let mut claimed = Vec::with_capacity(chosen.len());
        for row in chosen {
            let required_programs: Vec<ProgramRequirement> =
                serde_json::from_value(row.required_programs).map_err(|e| BrokerError::internal(anyhow!(e)))?;
            let required_capabilities = serde_json::from_value(row.required_capabilities)
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
            claimed.push(ClaimedTask {
                task_id: row.record_id,
                record_id: row.record_id,
                payload: row.payload,
                required_programs,
                required_capabilities,
            });
        }
        Ok(claimed)
    }

    async fn heartbeat_extend(&self, manager_name: &str) -> Result<u64> {
        let lease_deadline = Utc::now() + Duration::seconds(LEASE_SECONDS);
        let result = sqlx::query(
            "UPDATE qcbroker.tasks SET lease_deadline = $2 WHERE manager_name = $1",
        )
        .bind(manager_name)
        .bind(lease_deadline)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    async fn apply_returns(
        &self,
        manager_name: &str,
        results: BTreeMap<i64, TaskReturn>,
    ) -> Result<ReturnOutcome> {
        let mut outcome = ReturnOutcome::default();
        let mut tx = self.pool.begin().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;

        for (task_id, result) in results {
            let leased_by_caller = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM qcbroker.tasks WHERE record_id = $1 AND manager_name = $2)",
            )
            .bind(task_id)
            .bind(manager_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

            if !leased_by_caller {
                outcome.accepted.insert(task_id, false);
                continue;
            }

            let outcome_kind = match &result {
                TaskReturn::Success { .. } => ComputeOutcome::Success,
                TaskReturn::Error { .. } => ComputeOutcome::Error,
            };
            let provenance = result.clone();
            if let TaskReturn::Success { return_result } = &result {
                sqlx::query(
                    "UPDATE qcbroker.records SET outputs = jsonb_set(outputs, '{return_result}', $2) WHERE id = $1",
                )
                .bind(task_id)
                .bind(return_result)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
            }

            let provenance_json =
                serde_json::to_value(&provenance).map_err(|e| BrokerError::internal(anyhow!(e)))?;
            sqlx::query(
                "INSERT INTO qcbroker.record_compute_history (record_id, manager_name, status, provenance) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(task_id)
            .bind(manager_name)
            .bind(outcome_kind)
            .bind(&provenance_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

            sqlx::query("DELETE FROM qcbroker.tasks WHERE record_id = $1")
                .bind(task_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;

            outcome.accepted.insert(task_id, true);
        }

        tx.commit().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(outcome)
    }

    async fn remove(&self, record_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM qcbroker.tasks WHERE record_id = $1")
            .bind(record_id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;

        let expired: Vec<i64> = sqlx::query_scalar(
            "SELECT record_id FROM qcbroker.tasks WHERE lease_deadline < $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        if !expired.is_empty() {
            sqlx::query(
                "UPDATE qcbroker.tasks SET manager_name = NULL, lease_deadline = NULL WHERE record_id = ANY($1)",
            )
            .bind(&expired)
            .execute(&mut *tx)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

            sqlx::query("UPDATE qcbroker.records SET status = 'waiting', modified_on = now() WHERE id = ANY($1)")
                .bind(&expired)
                .execute(&mut *tx)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        }

        tx.commit().await.map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(expired)
    }
}
