//! Postgres-backed `RecordStore`. The record's mutable
//! lifecycle lives in `qcbroker.records`; its append-only trails
//! (comments, compute history) live in child tables rather than a growing
//! JSONB array, so each entry has its own row, timestamp, and index.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};

use qcbroker_core::error::{BrokerError, Result};
use qcbroker_core::hashing;
use qcbroker_core::ports::{RecordPage, RecordQuery, RecordRow, RecordStore};
use qcbroker_core::status::{self, StatusEvent};
use qcbroker_types::{
    Comment, ComputeHistoryEntry, Priority, ProgramRequirement, RecordOutputs, RecordStatus,
    RecordType,
};

pub struct PgRecordStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RecordCols {
    id: i64,
    record_type: RecordType,
    status: RecordStatus,
    specification_id: i64,
    molecule_ids: Vec<i64>,
    tag: String,
    priority: Priority,
    owner_user: Option<String>,
    manager_name: Option<String>,
    created_on: DateTime<Utc>,
    modified_on: DateTime<Utc>,
    resets_used: i32,
    pre_delete_status: Option<RecordStatus>,
    outputs: serde_json::Value,
}

const RECORD_COLUMNS: &str = "id, record_type, status, specification_id, molecule_ids, tag, \
     priority, owner_user, manager_name, created_on, modified_on, resets_used, \
     pre_delete_status, outputs";

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_row(&self, id: i64) -> Result<Option<RecordRow>> {
        let cols = sqlx::query_as::<_, RecordCols>(&format!(
            "SELECT {RECORD_COLUMNS} FROM qcbroker.records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let Some(cols) = cols else {
            return Ok(None);
        };

        let comments = sqlx::query_as::<_, (DateTime<Utc>, Option<String>, String)>(
            "SELECT created_at, username, text FROM qcbroker.record_comments \
             WHERE record_id = $1 ORDER BY created_at",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?
        .into_iter()
        .map(|(timestamp, username, text)| Comment {
            timestamp,
            username,
            text,
        })
        .collect();

        let compute_history = sqlx::query_as::<_, ComputeHistoryCols>(
            "SELECT manager_name, status, modified_on, provenance FROM qcbroker.record_compute_history \
             WHERE record_id = $1 ORDER BY modified_on",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?
        .into_iter()
        .map(ComputeHistoryEntry::from)
        .collect();

        let outputs: RecordOutputs =
            serde_json::from_value(cols.outputs).map_err(|e| BrokerError::internal(anyhow!(e)))?;

        Ok(Some(RecordRow {
            id: cols.id,
            record_type: cols.record_type,
            status: cols.status,
            specification_id: cols.specification_id,
            molecule_ids: cols.molecule_ids,
            tag: cols.tag,
            priority: cols.priority,
            owner_user: cols.owner_user,
            manager_name: cols.manager_name,
            created_on: cols.created_on,
            modified_on: cols.modified_on,
            resets_used: cols.resets_used as u32,
            pre_delete_status: cols.pre_delete_status,
            comments,
            compute_history,
            outputs,
        }))
    }

    async fn require_row(&self, id: i64) -> Result<RecordRow> {
        self.fetch_row(id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))
    }

    async fn apply_event(&self, id: i64, event: StatusEvent) -> Result<RecordRow> {
        let current = self.require_row(id).await?;
        let next = status::apply(current.status, event)?;
        sqlx::query("UPDATE qcbroker.records SET status = $2, modified_on = now() WHERE id = $1")
            .bind(id)
            .bind(next.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        self.require_row(id).await
    }
}

#[derive(sqlx::FromRow)]
struct ComputeHistoryCols {
    manager_name: Option<String>,
    status: qcbroker_types::ComputeOutcome,
    modified_on: DateTime<Utc>,
    provenance: Option<serde_json::Value>,
}

impl From<ComputeHistoryCols> for ComputeHistoryEntry {
    fn from(c: ComputeHistoryCols) -> Self {
        Self {
            manager_name: c.manager_name,
            status: c.status,
            modified_on: c.modified_on,
            provenance: c.provenance,
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn add_record(
        &self,
        record_type: RecordType,
        specification_id: i64,
        molecule_ids: Vec<i64>,
        tag: &str,
        priority: Priority,
        owner_user: Option<&str>,
        _payload: serde_json::Value,
        _required_programs: Vec<ProgramRequirement>,
        _required_capabilities: BTreeSet<String>,
    ) -> Result<(i64, bool)> {
        let body = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT body FROM qcbroker.specifications WHERE id = $1",
        )
        .bind(specification_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?
        .ok_or_else(|| BrokerError::NotFound(format!("specification {specification_id}")))?;
        let spec: qcbroker_types::Specification =
            serde_json::from_value(body).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        let dedup_key = format!(
            "{}:{}",
            hashing::spec_hash(&spec),
            hashing::inputs_hash(&molecule_ids)
        );

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO qcbroker.records
                (record_type, status, specification_id, molecule_ids, dedup_key, tag, priority, owner_user)
            VALUES ($1, 'waiting', $2, $3, $4, $5, $6, $7)
            ON CONFLICT (record_type, dedup_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record_type)
        .bind(specification_id)
        .bind(&molecule_ids)
        .bind(&dedup_key)
        .bind(tag)
        .bind(priority)
        .bind(owner_user)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        match inserted {
            Some(id) => Ok((id, true)),
            None => {
                let id = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM qcbroker.records WHERE record_type = $1 AND dedup_key = $2",
                )
                .bind(record_type)
                .bind(&dedup_key)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
                Ok((id, false))
            }
        }
    }

    async fn get_records(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<RecordRow>>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_row(*id).await? {
                Some(row) => out.push(Some(row)),
                None if missing_ok => out.push(None),
                None => return Err(BrokerError::NotFound(format!("record {id}"))),
            }
        }
        Ok(out)
    }

    async fn query_records(&self, filter: RecordQuery) -> Result<RecordPage> {
        let mut builder =
            sqlx::QueryBuilder::new(format!("SELECT {RECORD_COLUMNS} FROM qcbroker.records WHERE 1=1"));

        if let Some(ids) = &filter.ids {
            builder.push(" AND id = ANY(").push_bind(ids).push(")");
        }
        if let Some(statuses) = &filter.status {
            let as_str: Vec<&str> = statuses.iter().map(RecordStatus::as_str).collect();
            builder.push(" AND status = ANY(").push_bind(as_str).push(")");
        }
        if let Some(types) = &filter.record_type {
            let as_str: Vec<&str> = types.iter().map(RecordType::as_str).collect();
            builder.push(" AND record_type = ANY(").push_bind(as_str).push(")");
        }
        if let Some(manager_name) = &filter.manager_name {
            builder.push(" AND manager_name = ").push_bind(manager_name);
        }
        if let Some(tag) = &filter.tag {
            builder.push(" AND tag = ").push_bind(tag);
        }
        if let Some(owner) = &filter.owner_user {
            builder.push(" AND owner_user = ").push_bind(owner);
        }
        if let Some(t) = filter.created_before {
            builder.push(" AND created_on < ").push_bind(t);
        }
        if let Some(t) = filter.created_after {
            builder.push(" AND created_on > ").push_bind(t);
        }
        if let Some(t) = filter.modified_before {
            builder.push(" AND modified_on < ").push_bind(t);
        }
        if let Some(t) = filter.modified_after {
            builder.push(" AND modified_on > ").push_bind(t);
        }

        builder.push(" ORDER BY id LIMIT ");
        builder.push_bind((filter.limit.max(1) + 1) as i64);
        builder.push(" OFFSET ");
        builder.push_bind(filter.skip as i64);

        let cols: Vec<RecordCols> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;

        let limit = filter.limit.max(1) as usize;
        let has_more = cols.len() > limit;
        let page_cols = if has_more { &cols[..limit] } else { &cols[..] };

        let mut records = Vec::with_capacity(page_cols.len());
        for c in page_cols {
            if let Some(row) = self.fetch_row(c.id).await? {
                records.push(row);
            }
        }
        let next_skip = if has_more {
            Some(filter.skip + limit as u32)
        } else {
            None
        };
        Ok(RecordPage { records, next_skip })
    }

    async fn count_by_status(&self) -> Result<BTreeMap<RecordStatus, u64>> {
        let rows = sqlx::query_as::<_, (RecordStatus, i64)>(
            "SELECT status, COUNT(*) FROM qcbroker.records GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(rows.into_iter().map(|(status, count)| (status, count as u64)).collect())
    }

    async fn reset(&self, id: i64) -> Result<RecordRow> {
        let row = self.apply_event(id, StatusEvent::Reset).await?;
        sqlx::query("UPDATE qcbroker.records SET resets_used = resets_used + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(RecordRow {
            resets_used: row.resets_used + 1,
            ..row
        })
    }

    async fn cancel(&self, id: i64) -> Result<RecordRow> {
        self.apply_event(id, StatusEvent::Cancel).await
    }

    async fn uncancel(&self, id: i64) -> Result<RecordRow> {
        self.apply_event(id, StatusEvent::Uncancel).await
    }

    async fn invalidate(&self, id: i64) -> Result<RecordRow> {
        self.apply_event(id, StatusEvent::Invalidate).await
    }

    async fn uninvalidate(&self, id: i64) -> Result<RecordRow> {
        self.apply_event(id, StatusEvent::Uninvalidate).await
    }

    async fn soft_delete(&self, id: i64) -> Result<RecordRow> {
        let current = self.require_row(id).await?;
        let next = status::apply(current.status, StatusEvent::SoftDelete)?;
        sqlx::query(
            "UPDATE qcbroker.records SET status = $2, pre_delete_status = $3, modified_on = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next.as_str())
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        self.require_row(id).await
    }

    async fn undelete(&self, id: i64) -> Result<RecordRow> {
        let current = self.require_row(id).await?;
        let previous = current
            .pre_delete_status
            .ok_or_else(|| BrokerError::InvalidInput(format!("record {id} has no recorded pre-delete status")))?;
        self.apply_event(id, StatusEvent::Undelete(previous)).await
    }

    async fn hard_delete(&self, id: i64) -> Result<()> {
        let referenced = self.is_referenced(id).await?;
        if referenced {
            return Err(BrokerError::Conflict(format!(
                "record {id} is referenced by another record"
            )));
        }
        sqlx::query("DELETE FROM qcbroker.records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn modify(&self, id: i64, new_tag: Option<String>, new_priority: Option<Priority>) -> Result<RecordRow> {
        if let Some(tag) = new_tag {
            sqlx::query("UPDATE qcbroker.records SET tag = $2, modified_on = now() WHERE id = $1")
                .bind(id)
                .bind(tag)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        }
        if let Some(priority) = new_priority {
            sqlx::query("UPDATE qcbroker.records SET priority = $2, modified_on = now() WHERE id = $1")
                .bind(id)
                .bind(priority)
                .execute(&self.pool)
                .await
                .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        }
        self.require_row(id).await
    }

    async fn add_comment(&self, id: i64, username: Option<String>, text: String) -> Result<()> {
        sqlx::query(
            "INSERT INTO qcbroker.record_comments (record_id, username, text) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(username)
        .bind(text)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn transition(&self, id: i64, event: StatusEvent) -> Result<RecordRow> {
        self.apply_event(id, event).await
    }

    async fn set_stdout_blob(&self, id: i64, blob_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE qcbroker.records SET outputs = jsonb_set(outputs, '{stdout_blob_id}', to_jsonb($2::bigint)) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(blob_id)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn set_outputs(&self, id: i64, outputs: RecordOutputs) -> Result<()> {
        let body = serde_json::to_value(&outputs).map_err(|e| BrokerError::internal(anyhow!(e)))?;
        sqlx::query("UPDATE qcbroker.records SET outputs = $2 WHERE id = $1")
            .bind(id)
            .bind(&body)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn link_dependency(&self, parent_id: i64, child_id: i64, position: u32) -> Result<()> {
        sqlx::query(
            "INSERT INTO qcbroker.record_dependency (parent_id, child_id, position) VALUES ($1, $2, $3)",
        )
        .bind(parent_id)
        .bind(child_id)
        .bind(position as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(())
    }

    async fn children_of(&self, parent_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT child_id FROM qcbroker.record_dependency WHERE parent_id = $1 ORDER BY position",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(ids)
    }

    async fn parents_of(&self, child_id: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT parent_id FROM qcbroker.record_dependency WHERE child_id = $1",
        )
        .bind(child_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(ids)
    }

    async fn is_referenced(&self, id: i64) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM qcbroker.record_dependency WHERE child_id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BrokerError::internal(anyhow!(e)))?;
        Ok(exists)
    }
}
