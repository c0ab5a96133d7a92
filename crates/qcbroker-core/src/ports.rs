//! Port traits. Everything above this module
//! — record service, queue service, service engine, runner — depends only
//! on these traits, never on `sqlx`. `qcbroker-postgres` implements them
//! against a real pool; `testutil` implements them in memory for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qcbroker_types::{
    BlobMeta, ClaimedTask, KeywordSet, ManagerSummary, Molecule, Priority, ProgramRequirement,
    RecordStatus, RecordType, RegisterManagerRequest, Specification, TaskReturn,
};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::Result;

/// Per-element bulk-insert bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct BulkInsertOutcome {
    pub ids: Vec<i64>,
    pub inserted_idx: Vec<usize>,
    pub existing_idx: Vec<usize>,
    pub errors: Vec<(usize, String)>,
}

#[async_trait]
pub trait MoleculeStore: Send + Sync {
    async fn add_molecule(&self, molecule: &Molecule) -> Result<i64>;
    async fn add_molecules(&self, molecules: &[Molecule]) -> Result<BulkInsertOutcome>;
    async fn get_molecules(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<Molecule>>>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<i64>>;
}

#[async_trait]
pub trait KeywordSetStore: Send + Sync {
    async fn add_keyword_set(&self, keywords: &KeywordSet) -> Result<i64>;
    async fn get_keyword_set(&self, id: i64) -> Result<Option<KeywordSet>>;
}

#[async_trait]
pub trait SpecificationStore: Send + Sync {
    async fn add_specification(&self, spec: &Specification) -> Result<i64>;
    async fn get_specification(&self, id: i64) -> Result<Option<Specification>>;
}

/// Row shape a `RecordStore` persists and hands back to the engine. The
/// wire-level `qcbroker_types::Record` is assembled from this plus a couple
/// of joined lookups in `qcbroker-web`.
#[derive(Debug, Clone)]
pub struct RecordRow {
    pub id: i64,
    pub record_type: RecordType,
    pub status: RecordStatus,
    pub specification_id: i64,
    pub molecule_ids: Vec<i64>,
    pub tag: String,
    pub priority: Priority,
    pub owner_user: Option<String>,
    pub manager_name: Option<String>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub resets_used: u32,
    pub pre_delete_status: Option<RecordStatus>,
    pub comments: Vec<qcbroker_types::Comment>,
    pub compute_history: Vec<qcbroker_types::ComputeHistoryEntry>,
    pub outputs: qcbroker_types::RecordOutputs,
}

#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub ids: Option<Vec<i64>>,
    pub status: Option<Vec<RecordStatus>>,
    pub record_type: Option<Vec<RecordType>>,
    pub manager_name: Option<String>,
    pub tag: Option<String>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    pub modified_after: Option<DateTime<Utc>>,
    pub owner_user: Option<String>,
    pub limit: u32,
    pub skip: u32,
}

#[derive(Debug, Clone)]
pub struct RecordPage {
    pub records: Vec<RecordRow>,
    pub next_skip: Option<u32>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// De-duplicates on `(record_type, spec_hash, inputs_hash)`. Returns `(id, inserted)`; `inserted = false` means an existing
    /// record was found and nothing new was created.
    #[allow(clippy::too_many_arguments)]
    async fn add_record(
        &self,
        record_type: RecordType,
        specification_id: i64,
        molecule_ids: Vec<i64>,
        tag: &str,
        priority: Priority,
        owner_user: Option<&str>,
        payload: Value,
        required_programs: Vec<ProgramRequirement>,
        required_capabilities: BTreeSet<String>,
    ) -> Result<(i64, bool)>;

    async fn get_records(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<RecordRow>>>;
    async fn query_records(&self, filter: RecordQuery) -> Result<RecordPage>;
    /// Row count per status, used by the Internal Job Runner's stats
    /// snapshot without paging through every record.
    async fn count_by_status(&self) -> Result<std::collections::BTreeMap<RecordStatus, u64>>;

    async fn reset(&self, id: i64) -> Result<RecordRow>;
    async fn cancel(&self, id: i64) -> Result<RecordRow>;
    async fn uncancel(&self, id: i64) -> Result<RecordRow>;
    async fn invalidate(&self, id: i64) -> Result<RecordRow>;
    async fn uninvalidate(&self, id: i64) -> Result<RecordRow>;
    async fn soft_delete(&self, id: i64) -> Result<RecordRow>;
    async fn undelete(&self, id: i64) -> Result<RecordRow>;
    /// Fails if any other record or dataset references `id`.
    async fn hard_delete(&self, id: i64) -> Result<()>;

    async fn modify(&self, id: i64, new_tag: Option<String>, new_priority: Option<Priority>) -> Result<RecordRow>;
    async fn add_comment(&self, id: i64, username: Option<String>, text: String) -> Result<()>;

    /// Transitions the record in place and persists the row; used by the
    /// task queue and service engine rather than the public mutation API.
    async fn transition(&self, id: i64, event: crate::status::StatusEvent) -> Result<RecordRow>;

    /// Records a new/updated stdout blob id, used by the service engine's
    /// per-iteration log append without requiring a full
    /// outputs round trip.
    async fn set_stdout_blob(&self, id: i64, blob_id: i64) -> Result<()>;
    async fn set_outputs(&self, id: i64, outputs: qcbroker_types::RecordOutputs) -> Result<()>;

    async fn link_dependency(&self, parent_id: i64, child_id: i64, position: u32) -> Result<()>;
    async fn children_of(&self, parent_id: i64) -> Result<Vec<i64>>;
    async fn parents_of(&self, child_id: i64) -> Result<Vec<i64>>;
    async fn is_referenced(&self, id: i64) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct EnqueueTask {
    pub record_id: i64,
    pub tag: String,
    pub priority: Priority,
    pub required_programs: Vec<ProgramRequirement>,
    pub required_capabilities: BTreeSet<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ReturnOutcome {
    /// task_id -> whether the lease was live and the return was applied.
    pub accepted: std::collections::BTreeMap<i64, bool>,
}

/// Task queue port. `claim` must be a single serialized
/// operation — `qcbroker-postgres` implements it with
/// `SELECT ... FOR UPDATE SKIP LOCKED`.
#[async_trait]
pub trait TaskQueuePort: Send + Sync {
    async fn enqueue(&self, task: EnqueueTask) -> Result<i64>;
    async fn claim(&self, manager_name: &str, tags: &[String], programs: &std::collections::BTreeMap<String, String>, limit: u32) -> Result<Vec<ClaimedTask>>;
    async fn heartbeat_extend(&self, manager_name: &str) -> Result<u64>;
    async fn apply_returns(&self, manager_name: &str, results: std::collections::BTreeMap<i64, TaskReturn>) -> Result<ReturnOutcome>;
    /// Removes the task row for `record_id` without altering its status
    /// (used when a service child completes but status transitions happen
    /// through `RecordStore::transition` separately).
    async fn remove(&self, record_id: i64) -> Result<()>;
    /// Requeues every task whose lease expired before `now`; returns the
    /// record ids that were reset to `waiting`.
    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;
}

#[derive(Debug, Clone)]
pub struct ServiceRow {
    pub record_id: i64,
    pub tag: String,
    pub priority: Priority,
    pub iterate_state: Value,
    pub pending_children: Vec<i64>,
    pub iteration: u32,
    pub next_iteration_due_at: DateTime<Utc>,
}

#[async_trait]
pub trait ServiceQueuePort: Send + Sync {
    async fn create(&self, record_id: i64, tag: &str, priority: Priority, initial_state: Value) -> Result<()>;
    async fn get(&self, record_id: i64) -> Result<Option<ServiceRow>>;
    /// Services due for iteration: `next_iteration_due_at <= now`, status in
    /// {waiting, running}, and every pending child terminal.
    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ServiceRow>>;
    async fn update_state(
        &self,
        record_id: i64,
        new_state: Value,
        new_children: Vec<i64>,
        next_due_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn remove(&self, record_id: i64) -> Result<()>;
}

#[async_trait]
pub trait ManagerRegistryPort: Send + Sync {
    async fn register(&self, request: RegisterManagerRequest) -> Result<i64>;
    async fn record_heartbeat(&self, name: &str, status_counts: &std::collections::BTreeMap<String, u64>) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<ManagerSummary>>;
    async fn list(&self) -> Result<Vec<ManagerSummary>>;
    /// Managers whose last heartbeat predates `cutoff`; marks them inactive
    /// as a side effect.
    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ManagerSummary>>;
    async fn record_claim(&self, name: &str, count: u64) -> Result<()>;
    async fn record_completion(&self, name: &str, succeeded: bool) -> Result<()>;
}

#[async_trait]
pub trait BlobStorePort: Send + Sync {
    async fn put(&self, content_type: qcbroker_types::ContentType, bytes: Vec<u8>, compress: bool) -> Result<i64>;
    async fn get(&self, id: i64) -> Result<Option<qcbroker_types::BlobPayload>>;
    async fn meta(&self, id: i64) -> Result<Option<BlobMeta>>;
    /// Appends a line to a text blob, creating it if `id` is `None`. Used
    /// for the service engine's per-iteration stdout log.
    async fn append_text(&self, id: Option<i64>, line: &str) -> Result<i64>;
}
