//! In-memory port implementations for the state-machine/queue logic end to
//! end without a live Postgres. Mirrors the shape of
//! `qcbroker-postgres`'s adapters closely enough that a bug caught here is a
//! real bug there, but trades durability for a plain `Mutex<HashMap<..>>`.
//!
//! Not wired into any binary; only `#[cfg(test)]` and integration tests in
//! `tests/` depend on this module.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use qcbroker_types::{
    BlobMeta, BlobPayload, ClaimedTask, ContentType, KeywordSet, ManagerStatus, ManagerSummary,
    Molecule, Priority, ProgramRequirement, RecordOutputs, RecordStatus, RecordType,
    RegisterManagerRequest, Specification, TaskReturn, WILDCARD_TAG,
};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{BrokerError, Result};
use crate::hashing;
use crate::ports::{
    BlobStorePort, BulkInsertOutcome, EnqueueTask, KeywordSetStore, ManagerRegistryPort,
    MoleculeStore, RecordPage, RecordQuery, RecordRow, RecordStore, ReturnOutcome,
    ServiceQueuePort, ServiceRow, SpecificationStore, TaskQueuePort,
};
use crate::status::{self, StatusEvent};

#[derive(Default)]
struct Sequences {
    next_molecule: i64,
    next_keyword_set: i64,
    next_specification: i64,
    next_record: i64,
    next_task: i64,
    next_manager: i64,
    next_blob: i64,
}

impl Sequences {
    fn bump(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }
}

struct TaskRow {
    record_id: i64,
    tag: String,
    priority: Priority,
    required_programs: Vec<ProgramRequirement>,
    required_capabilities: BTreeSet<String>,
    payload: Value,
    manager_name: Option<String>,
    lease_deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Clone)]
struct ManagerRow {
    id: i64,
    name: String,
    cluster: String,
    hostname: String,
    version: String,
    tags: Vec<String>,
    programs: BTreeMap<String, String>,
    status: ManagerStatus,
    last_heartbeat: DateTime<Utc>,
    claimed_count: u64,
    completed_count: u64,
    failed_count: u64,
}

#[derive(Clone)]
struct BlobRow {
    content_type: ContentType,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    seq: Sequences,
    molecules_by_hash: HashMap<String, i64>,
    molecules: HashMap<i64, Molecule>,
    keyword_sets_by_hash: HashMap<String, i64>,
    keyword_sets: HashMap<i64, KeywordSet>,
    specifications_by_hash: HashMap<String, i64>,
    specifications: HashMap<i64, Specification>,
    records: HashMap<i64, RecordRow>,
    records_by_dedup_key: HashMap<(RecordType, String, String), i64>,
    tasks: HashMap<i64, TaskRow>,
    services: HashMap<i64, ServiceRow>,
    managers: HashMap<String, ManagerRow>,
    blobs: HashMap<i64, BlobRow>,
    dependencies: Vec<(i64, i64, u32)>,
}

/// A single in-memory store implementing every port trait. Tests share one
/// `Arc<InMemoryStore>` across the record/queue/manager services the same
/// way `qcbroker-postgres`'s adapters share one `PgPool`.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl MoleculeStore for InMemoryStore {
    async fn add_molecule(&self, molecule: &Molecule) -> Result<i64> {
        let mut state = self.state.lock().await;
        let hash = hashing::molecule_hash(molecule);
        if let Some(id) = state.molecules_by_hash.get(&hash) {
            return Ok(*id);
        }
        let id = Sequences::bump(&mut state.seq.next_molecule);
        state.molecules_by_hash.insert(hash, id);
        state.molecules.insert(id, molecule.clone());
        Ok(id)
    }

    async fn add_molecules(&self, molecules: &[Molecule]) -> Result<BulkInsertOutcome> {
        let mut outcome = BulkInsertOutcome::default();
        for (idx, molecule) in molecules.iter().enumerate() {
            let mut state = self.state.lock().await;
            let hash = hashing::molecule_hash(molecule);
            if let Some(id) = state.molecules_by_hash.get(&hash).copied() {
                outcome.ids.push(id);
                outcome.existing_idx.push(idx);
                continue;
            }
            let id = Sequences::bump(&mut state.seq.next_molecule);
            state.molecules_by_hash.insert(hash, id);
            state.molecules.insert(id, molecule.clone());
            outcome.ids.push(id);
            outcome.inserted_idx.push(idx);
        }
        Ok(outcome)
    }

    async fn get_molecules(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<Molecule>>> {
        let state = self.state.lock().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match state.molecules.get(id) {
                Some(m) => out.push(Some(m.clone())),
                None if missing_ok => out.push(None),
                None => return Err(BrokerError::NotFound(format!("molecule {id}"))),
            }
        }
        Ok(out)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state.molecules_by_hash.get(hash).copied())
    }
}

#[async_trait]
impl KeywordSetStore for InMemoryStore {
    async fn add_keyword_set(&self, keywords: &KeywordSet) -> Result<i64> {
        let mut state = self.state.lock().await;
        let hash = hashing::keyword_set_hash(keywords);
        if let Some(id) = state.keyword_sets_by_hash.get(&hash) {
            return Ok(*id);
        }
        let id = Sequences::bump(&mut state.seq.next_keyword_set);
        state.keyword_sets_by_hash.insert(hash, id);
        state.keyword_sets.insert(id, keywords.clone());
        Ok(id)
    }

    async fn get_keyword_set(&self, id: i64) -> Result<Option<KeywordSet>> {
        let state = self.state.lock().await;
        Ok(state.keyword_sets.get(&id).cloned())
    }
}

#[async_trait]
impl SpecificationStore for InMemoryStore {
    async fn add_specification(&self, spec: &Specification) -> Result<i64> {
        let mut state = self.state.lock().await;
        let hash = hashing::spec_hash(spec);
        if let Some(id) = state.specifications_by_hash.get(&hash) {
            return Ok(*id);
        }
        let id = Sequences::bump(&mut state.seq.next_specification);
        state.specifications_by_hash.insert(hash, id);
        state.specifications.insert(id, spec.clone());
        Ok(id)
    }

    async fn get_specification(&self, id: i64) -> Result<Option<Specification>> {
        let state = self.state.lock().await;
        Ok(state.specifications.get(&id).cloned())
    }
}

fn version_satisfies(declared: &str, required: &Option<String>) -> bool {
    let Some(required) = required else {
        return true;
    };
    let parse = |s: &str| -> Vec<u64> {
        s.split('.').filter_map(|p| p.parse::<u64>().ok()).collect()
    };
    parse(declared) >= parse(required)
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn add_record(
        &self,
        record_type: RecordType,
        specification_id: i64,
        molecule_ids: Vec<i64>,
        tag: &str,
        priority: Priority,
        owner_user: Option<&str>,
        _payload: Value,
        _required_programs: Vec<ProgramRequirement>,
        _required_capabilities: BTreeSet<String>,
    ) -> Result<(i64, bool)> {
        let mut state = self.state.lock().await;
        let spec_hash = state
            .specifications
            .get(&specification_id)
            .map(hashing::spec_hash)
            .ok_or_else(|| BrokerError::NotFound(format!("specification {specification_id}")))?;
        let inputs_hash = hashing::inputs_hash(&molecule_ids);
        let key = (record_type, spec_hash, inputs_hash);
        if let Some(id) = state.records_by_dedup_key.get(&key) {
            return Ok((*id, false));
        }
        let id = Sequences::bump(&mut state.seq.next_record);
        let now = Utc::now();
        let row = RecordRow {
            id,
            record_type,
            status: RecordStatus::Waiting,
            specification_id,
            molecule_ids,
            tag: tag.to_string(),
            priority,
            owner_user: owner_user.map(|s| s.to_string()),
            manager_name: None,
            created_on: now,
            modified_on: now,
            resets_used: 0,
            pre_delete_status: None,
            comments: Vec::new(),
            compute_history: Vec::new(),
            outputs: RecordOutputs::default(),
        };
        state.records.insert(id, row);
        state.records_by_dedup_key.insert(key, id);
        Ok((id, true))
    }

    async fn get_records(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<RecordRow>>> {
        let state = self.state.lock().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match state.records.get(id) {
                Some(r) => out.push(Some(r.clone())),
                None if missing_ok => out.push(None),
                None => return Err(BrokerError::NotFound(format!("record {id}"))),
            }
        }
        Ok(out)
    }

    async fn query_records(&self, filter: RecordQuery) -> Result<RecordPage> {
        let state = self.state.lock().await;
        let mut matches: Vec<RecordRow> = state
            .records
            .values()
            .filter(|r| filter.ids.as_ref().map_or(true, |ids| ids.contains(&r.id)))
            .filter(|r| {
                filter
                    .status
                    .as_ref()
                    .map_or(true, |statuses| statuses.contains(&r.status))
            })
            .filter(|r| {
                filter
                    .record_type
                    .as_ref()
                    .map_or(true, |types| types.contains(&r.record_type))
            })
            .filter(|r| {
                filter
                    .manager_name
                    .as_ref()
                    .map_or(true, |name| r.manager_name.as_deref() == Some(name.as_str()))
            })
            .filter(|r| filter.tag.as_ref().map_or(true, |tag| &r.tag == tag))
            .filter(|r| {
                filter
                    .owner_user
                    .as_ref()
                    .map_or(true, |owner| r.owner_user.as_deref() == Some(owner.as_str()))
            })
            .filter(|r| filter.created_before.map_or(true, |t| r.created_on < t))
            .filter(|r| filter.created_after.map_or(true, |t| r.created_on > t))
            .filter(|r| filter.modified_before.map_or(true, |t| r.modified_on < t))
            .filter(|r| filter.modified_after.map_or(true, |t| r.modified_on > t))
            .cloned()
            .collect();
        matches.sort_by_key(|r| r.id);

        let skip = filter.skip as usize;
        let limit = filter.limit.max(1) as usize;
        let page: Vec<RecordRow> = matches.iter().skip(skip).take(limit).cloned().collect();
        let next_skip = if skip + page.len() < matches.len() {
            Some((skip + page.len()) as u32)
        } else {
            None
        };
        Ok(RecordPage {
            records: page,
            next_skip,
        })
    }

    async fn count_by_status(&self) -> Result<BTreeMap<RecordStatus, u64>> {
        let state = self.state.lock().await;
        let mut counts = BTreeMap::new();
        for row in state.records.values() {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn reset(&self, id: i64) -> Result<RecordRow> {
        self.transition(id, StatusEvent::Reset).await
    }

    async fn cancel(&self, id: i64) -> Result<RecordRow> {
        self.transition(id, StatusEvent::Cancel).await
    }

    async fn uncancel(&self, id: i64) -> Result<RecordRow> {
        self.transition(id, StatusEvent::Uncancel).await
    }

    async fn invalidate(&self, id: i64) -> Result<RecordRow> {
        self.transition(id, StatusEvent::Invalidate).await
    }

    async fn uninvalidate(&self, id: i64) -> Result<RecordRow> {
        self.transition(id, StatusEvent::Uninvalidate).await
    }

    async fn soft_delete(&self, id: i64) -> Result<RecordRow> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        let new_status = status::apply(row.status, StatusEvent::SoftDelete)
            .map_err(|_| BrokerError::InvalidTransition(format!("cannot soft-delete record {id}")))?;
        row.pre_delete_status = Some(row.status);
        row.status = new_status;
        row.modified_on = Utc::now();
        Ok(row.clone())
    }

    async fn undelete(&self, id: i64) -> Result<RecordRow> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        let previous = row
            .pre_delete_status
            .ok_or_else(|| BrokerError::InvalidInput(format!("record {id} has no recorded pre-delete status")))?;
        row.status = status::apply(row.status, StatusEvent::Undelete(previous))
            .map_err(|_| BrokerError::InvalidTransition(format!("cannot undelete record {id}")))?;
        row.modified_on = Utc::now();
        Ok(row.clone())
    }

    async fn hard_delete(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let referenced = state.dependencies.iter().any(|(_, child, _)| *child == id);
        if referenced {
            return Err(BrokerError::Conflict(format!(
                "record {id} is referenced by another record"
            )));
        }
        state.records.remove(&id);
        Ok(())
    }

    async fn modify(&self, id: i64, new_tag: Option<String>, new_priority: Option<Priority>) -> Result<RecordRow> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        if let Some(tag) = new_tag {
            row.tag = tag;
        }
        if let Some(priority) = new_priority {
            row.priority = priority;
        }
        row.modified_on = Utc::now();
        Ok(row.clone())
    }

    async fn add_comment(&self, id: i64, username: Option<String>, text: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        row.comments.push(qcbroker_types::Comment {
            timestamp: Utc::now(),
            username,
            text,
        });
        Ok(())
    }

    async fn transition(&self, id: i64, event: StatusEvent) -> Result<RecordRow> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        row.status = status::apply(row.status, event)?;
        row.modified_on = Utc::now();
        Ok(row.clone())
    }

    async fn set_stdout_blob(&self, id: i64, blob_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        row.outputs.stdout_blob_id = Some(blob_id);
        Ok(())
    }

    async fn set_outputs(&self, id: i64, outputs: RecordOutputs) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .records
            .get_mut(&id)
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        row.outputs = outputs;
        Ok(())
    }

    async fn link_dependency(&self, parent_id: i64, child_id: i64, position: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        state.dependencies.push((parent_id, child_id, position));
        Ok(())
    }

    async fn children_of(&self, parent_id: i64) -> Result<Vec<i64>> {
        let state = self.state.lock().await;
        let mut children: Vec<(u32, i64)> = state
            .dependencies
            .iter()
            .filter(|(p, _, _)| *p == parent_id)
            .map(|(_, c, pos)| (*pos, *c))
            .collect();
        children.sort_by_key(|(pos, _)| *pos);
        Ok(children.into_iter().map(|(_, c)| c).collect())
    }

    async fn parents_of(&self, child_id: i64) -> Result<Vec<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .dependencies
            .iter()
            .filter(|(_, c, _)| *c == child_id)
            .map(|(p, _, _)| *p)
            .collect())
    }

    async fn is_referenced(&self, id: i64) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.dependencies.iter().any(|(_, child, _)| *child == id))
    }
}

#[async_trait]
impl TaskQueuePort for InMemoryStore {
    async fn enqueue(&self, task: EnqueueTask) -> Result<i64> {
        let mut state = self.state.lock().await;
        let id = Sequences::bump(&mut state.seq.next_task);
        state.tasks.insert(
            task.record_id,
            TaskRow {
                record_id: task.record_id,
                tag: task.tag,
                priority: task.priority,
                required_programs: task.required_programs,
                required_capabilities: task.required_capabilities,
                payload: task.payload,
                manager_name: None,
                lease_deadline: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn claim(
        &self,
        manager_name: &str,
        tags: &[String],
        programs: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<ClaimedTask>> {
        let mut state = self.state.lock().await;

        let mut candidate_ids: Vec<i64> = Vec::new();
        for manager_tag in tags {
            for (record_id, task) in state.tasks.iter() {
                let row = match state.records.get(record_id) {
                    Some(r) if r.status == RecordStatus::Waiting => r,
                    _ => continue,
                };
                if task.lease_deadline.is_some() {
                    continue;
                }
                let tag_matches = task.tag == *manager_tag
                    || (manager_tag == WILDCARD_TAG && task.tag != WILDCARD_TAG)
                    || (task.tag == WILDCARD_TAG && manager_tag == WILDCARD_TAG);
                if !tag_matches {
                    continue;
                }
                let programs_ok = task.required_programs.iter().all(|req| {
                    programs
                        .get(&req.name)
                        .is_some_and(|declared| version_satisfies(declared, &req.min_version))
                });
                if !programs_ok {
                    continue;
                }
                if !candidate_ids.contains(record_id) {
                    candidate_ids.push(*record_id);
                }
                let _ = row;
            }
        }

        candidate_ids.sort_by(|a, b| {
            let ta = &state.tasks[a];
            let tb = &state.tasks[b];
            tb.priority
                .cmp(&ta.priority)
                .then_with(|| ta.created_at.cmp(&tb.created_at))
        });
        candidate_ids.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(candidate_ids.len());
        let lease_deadline = Utc::now() + Duration::seconds(180);
        for record_id in candidate_ids {
            let task = state.tasks.get_mut(&record_id).unwrap();
            task.manager_name = Some(manager_name.to_string());
            task.lease_deadline = Some(lease_deadline);
            claimed.push(ClaimedTask {
                task_id: record_id,
                record_id,
                payload: task.payload.clone(),
                required_programs: task.required_programs.clone(),
                required_capabilities: task.required_capabilities.clone(),
            });
            if let Some(row) = state.records.get_mut(&record_id) {
                row.manager_name = Some(manager_name.to_string());
            }
        }
        Ok(claimed)
    }

    async fn heartbeat_extend(&self, manager_name: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let lease_deadline = Utc::now() + Duration::seconds(180);
        let mut extended = 0;
        for task in state.tasks.values_mut() {
            if task.manager_name.as_deref() == Some(manager_name) {
                task.lease_deadline = Some(lease_deadline);
                extended += 1;
            }
        }
        Ok(extended)
    }

    async fn apply_returns(
        &self,
        manager_name: &str,
        results: BTreeMap<i64, TaskReturn>,
    ) -> Result<ReturnOutcome> {
        let mut state = self.state.lock().await;
        let mut outcome = ReturnOutcome::default();
        for (task_id, result) in results {
            let leased_by_caller = state
                .tasks
                .get(&task_id)
                .and_then(|t| t.manager_name.as_deref())
                == Some(manager_name);
            if !leased_by_caller {
                outcome.accepted.insert(task_id, false);
                continue;
            }
            if let Some(row) = state.records.get_mut(&task_id) {
                let (outcome_kind, provenance) = match &result {
                    TaskReturn::Success { return_result } => {
                        row.outputs.return_result = return_result.as_f64();
                        (qcbroker_types::ComputeOutcome::Success, result.clone())
                    }
                    TaskReturn::Error { error } => {
                        (qcbroker_types::ComputeOutcome::Error, TaskReturn::Error { error: error.clone() })
                    }
                };
                row.compute_history.push(qcbroker_types::ComputeHistoryEntry {
                    manager_name: Some(manager_name.to_string()),
                    status: outcome_kind,
                    modified_on: Utc::now(),
                    provenance: serde_json::to_value(&provenance).ok(),
                });
            }
            state.tasks.remove(&task_id);
            outcome.accepted.insert(task_id, true);
        }
        Ok(outcome)
    }

    async fn remove(&self, record_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tasks.remove(&record_id);
        Ok(())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut state = self.state.lock().await;
        let expired: Vec<i64> = state
            .tasks
            .iter()
            .filter(|(_, t)| t.lease_deadline.is_some_and(|d| d < now))
            .map(|(id, _)| *id)
            .collect();
        for record_id in &expired {
            if let Some(task) = state.tasks.get_mut(record_id) {
                task.manager_name = None;
                task.lease_deadline = None;
            }
            if let Some(row) = state.records.get_mut(record_id) {
                row.status = RecordStatus::Waiting;
            }
        }
        Ok(expired)
    }
}

#[async_trait]
impl ServiceQueuePort for InMemoryStore {
    async fn create(&self, record_id: i64, tag: &str, priority: Priority, initial_state: Value) -> Result<()> {
        let mut state = self.state.lock().await;
        state.services.insert(
            record_id,
            ServiceRow {
                record_id,
                tag: tag.to_string(),
                priority,
                iterate_state: initial_state,
                pending_children: Vec::new(),
                iteration: 0,
                next_iteration_due_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, record_id: i64) -> Result<Option<ServiceRow>> {
        let state = self.state.lock().await;
        Ok(state.services.get(&record_id).cloned())
    }

    async fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ServiceRow>> {
        let state = self.state.lock().await;
        let mut due: Vec<ServiceRow> = state
            .services
            .values()
            .filter(|s| s.next_iteration_due_at <= now)
            .filter(|s| {
                state
                    .records
                    .get(&s.record_id)
                    .is_some_and(|r| matches!(r.status, RecordStatus::Waiting | RecordStatus::Running))
            })
            .filter(|s| {
                s.pending_children.iter().all(|child_id| {
                    state
                        .records
                        .get(child_id)
                        .is_some_and(|c| c.status.is_terminal())
                })
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.record_id);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn update_state(
        &self,
        record_id: i64,
        new_state: Value,
        new_children: Vec<i64>,
        next_due_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let row = state
            .services
            .get_mut(&record_id)
            .ok_or_else(|| BrokerError::NotFound(format!("service {record_id}")))?;
        row.iterate_state = new_state;
        row.pending_children = new_children;
        row.iteration += 1;
        row.next_iteration_due_at = next_due_at;
        Ok(())
    }

    async fn remove(&self, record_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.services.remove(&record_id);
        Ok(())
    }
}

#[async_trait]
impl ManagerRegistryPort for InMemoryStore {
    async fn register(&self, request: RegisterManagerRequest) -> Result<i64> {
        let mut state = self.state.lock().await;
        let id = Sequences::bump(&mut state.seq.next_manager);
        state.managers.insert(
            request.name.clone(),
            ManagerRow {
                id,
                name: request.name,
                cluster: request.cluster,
                hostname: request.hostname,
                version: request.version,
                tags: request.tags,
                programs: request.programs,
                status: ManagerStatus::Active,
                last_heartbeat: Utc::now(),
                claimed_count: 0,
                completed_count: 0,
                failed_count: 0,
            },
        );
        Ok(id)
    }

    async fn record_heartbeat(&self, name: &str, _status_counts: &BTreeMap<String, u64>) -> Result<()> {
        let mut state = self.state.lock().await;
        let manager = state
            .managers
            .get_mut(name)
            .ok_or_else(|| BrokerError::ManagerUnknown(name.to_string()))?;
        manager.last_heartbeat = Utc::now();
        manager.status = ManagerStatus::Active;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<ManagerSummary>> {
        let state = self.state.lock().await;
        Ok(state.managers.get(name).map(to_summary))
    }

    async fn list(&self) -> Result<Vec<ManagerSummary>> {
        let state = self.state.lock().await;
        Ok(state.managers.values().map(to_summary).collect())
    }

    async fn reap_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ManagerSummary>> {
        let mut state = self.state.lock().await;
        let mut reaped = Vec::new();
        for manager in state.managers.values_mut() {
            if manager.status == ManagerStatus::Active && manager.last_heartbeat < cutoff {
                manager.status = ManagerStatus::Inactive;
                reaped.push(to_summary(manager));
            }
        }
        Ok(reaped)
    }

    async fn record_claim(&self, name: &str, count: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(manager) = state.managers.get_mut(name) {
            manager.claimed_count += count;
        }
        Ok(())
    }

    async fn record_completion(&self, name: &str, succeeded: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(manager) = state.managers.get_mut(name) {
            if succeeded {
                manager.completed_count += 1;
            } else {
                manager.failed_count += 1;
            }
        }
        Ok(())
    }
}

fn to_summary(m: &ManagerRow) -> ManagerSummary {
    ManagerSummary {
        id: m.id,
        name: m.name.clone(),
        cluster: m.cluster.clone(),
        hostname: m.hostname.clone(),
        version: m.version.clone(),
        tags: m.tags.clone(),
        programs: m.programs.clone(),
        status: m.status,
        last_heartbeat: m.last_heartbeat,
        claimed_count: m.claimed_count,
        completed_count: m.completed_count,
        failed_count: m.failed_count,
    }
}

#[async_trait]
impl BlobStorePort for InMemoryStore {
    async fn put(&self, content_type: ContentType, bytes: Vec<u8>, _compress: bool) -> Result<i64> {
        let mut state = self.state.lock().await;
        let id = Sequences::bump(&mut state.seq.next_blob);
        state.blobs.insert(id, BlobRow { content_type, bytes });
        Ok(id)
    }

    async fn get(&self, id: i64) -> Result<Option<BlobPayload>> {
        let state = self.state.lock().await;
        Ok(state.blobs.get(&id).map(|b| BlobPayload {
            content_type: b.content_type,
            data: b.bytes.clone(),
        }))
    }

    async fn meta(&self, id: i64) -> Result<Option<BlobMeta>> {
        let state = self.state.lock().await;
        Ok(state.blobs.get(&id).map(|b| BlobMeta {
            id,
            content_type: b.content_type,
            compressed: false,
            size_bytes: b.bytes.len() as u64,
        }))
    }

    async fn append_text(&self, id: Option<i64>, line: &str) -> Result<i64> {
        let mut state = self.state.lock().await;
        match id {
            Some(id) => {
                if let Some(blob) = state.blobs.get_mut(&id) {
                    blob.bytes.extend_from_slice(line.as_bytes());
                    blob.bytes.push(b'\n');
                    return Ok(id);
                }
                let new_id = Sequences::bump(&mut state.seq.next_blob);
                state.blobs.insert(
                    new_id,
                    BlobRow {
                        content_type: ContentType::Text,
                        bytes: format!("{line}\n").into_bytes(),
                    },
                );
                Ok(new_id)
            }
            None => {
                let new_id = Sequences::bump(&mut state.seq.next_blob);
                state.blobs.insert(
                    new_id,
                    BlobRow {
                        content_type: ContentType::Text,
                        bytes: format!("{line}\n").into_bytes(),
                    },
                );
                Ok(new_id)
            }
        }
    }
}
