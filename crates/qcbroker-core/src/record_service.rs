//! Record Store façade: dedups molecules/keyword
//! sets/specifications, creates records, and atomically enqueues the
//! matching task or service row. Mutations route every status change
//! through `status::apply` so the state machine is the only source of
//! truth for what's legal.

use std::collections::BTreeSet;
use std::sync::Arc;

use qcbroker_types::{
    Molecule, Priority, ProgramRequirement, Record, RecordStatus, RecordType, Specification,
};
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::ports::{
    BulkInsertOutcome, EnqueueTask, KeywordSetStore, MoleculeStore, RecordPage, RecordQuery,
    RecordRow, RecordStore, ServiceQueuePort, SpecificationStore, TaskQueuePort,
};
use crate::status::{self, StatusEvent};

pub struct RecordService {
    molecules: Arc<dyn MoleculeStore>,
    keyword_sets: Arc<dyn KeywordSetStore>,
    specifications: Arc<dyn SpecificationStore>,
    records: Arc<dyn RecordStore>,
    tasks: Arc<dyn TaskQueuePort>,
    services: Arc<dyn ServiceQueuePort>,
}

impl RecordService {
    pub fn new(
        molecules: Arc<dyn MoleculeStore>,
        keyword_sets: Arc<dyn KeywordSetStore>,
        specifications: Arc<dyn SpecificationStore>,
        records: Arc<dyn RecordStore>,
        tasks: Arc<dyn TaskQueuePort>,
        services: Arc<dyn ServiceQueuePort>,
    ) -> Self {
        Self {
            molecules,
            keyword_sets,
            specifications,
            records,
            tasks,
            services,
        }
    }

    pub async fn add_molecule(&self, molecule: &Molecule) -> Result<i64> {
        molecule
            .validate()
            .map_err(BrokerError::InvalidInput)?;
        self.molecules.add_molecule(molecule).await
    }

    pub async fn add_molecules(&self, molecules: &[Molecule]) -> Result<BulkInsertOutcome> {
        for molecule in molecules {
            molecule.validate().map_err(BrokerError::InvalidInput)?;
        }
        self.molecules.add_molecules(molecules).await
    }

    pub async fn get_molecules(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<Molecule>>> {
        self.molecules.get_molecules(ids, missing_ok).await
    }

    /// Submits one record per molecule id against one specification,
    /// matching the bulk shape of `POST /records/{type}`.
    pub async fn add_records(
        &self,
        molecule_ids: &[i64],
        specification: &Specification,
        tag: &str,
        priority: Priority,
        owner_user: Option<&str>,
    ) -> Result<BulkInsertOutcome> {
        let spec_id = self.specifications.add_specification(specification).await?;
        let record_type = specification.record_type();

        let mut outcome = BulkInsertOutcome::default();
        for (idx, molecule_id) in molecule_ids.iter().enumerate() {
            match self
                .add_one_record(record_type, spec_id, vec![*molecule_id], tag, priority, owner_user)
                .await
            {
                Ok((id, inserted)) => {
                    outcome.ids.push(id);
                    if inserted {
                        outcome.inserted_idx.push(idx);
                    } else {
                        outcome.existing_idx.push(idx);
                    }
                }
                Err(e) => outcome.errors.push((idx, e.to_string())),
            }
        }
        Ok(outcome)
    }

    async fn add_one_record(
        &self,
        record_type: RecordType,
        specification_id: i64,
        molecule_ids: Vec<i64>,
        tag: &str,
        priority: Priority,
        owner_user: Option<&str>,
    ) -> Result<(i64, bool)> {
        let payload = serde_json::json!({
            "specification_id": specification_id,
            "molecule_ids": molecule_ids,
        });
        let (required_programs, required_capabilities) = (Vec::<ProgramRequirement>::new(), BTreeSet::new());

        let (id, inserted) = self
            .records
            .add_record(
                record_type,
                specification_id,
                molecule_ids,
                tag,
                priority,
                owner_user,
                payload.clone(),
                required_programs.clone(),
                required_capabilities.clone(),
            )
            .await?;

        if inserted {
            if record_type.is_service() {
                self.services
                    .create(id, tag, priority, Value::Null)
                    .await?;
            } else {
                self.tasks
                    .enqueue(EnqueueTask {
                        record_id: id,
                        tag: tag.to_string(),
                        priority,
                        required_programs,
                        required_capabilities,
                        payload,
                    })
                    .await?;
            }
        }
        Ok((id, inserted))
    }

    pub async fn get_records(&self, ids: &[i64], missing_ok: bool) -> Result<Vec<Option<RecordRow>>> {
        self.records.get_records(ids, missing_ok).await
    }

    /// Submits a service iteration's spawned child, deduplicated the same
    /// way a top-level submission is, then links it as a dependency of
    /// `parent_id` at `position`.
    pub async fn add_child_record(
        &self,
        parent_id: i64,
        specification: &Specification,
        molecule_ids: Vec<i64>,
        tag: &str,
        priority: Priority,
        position: u32,
    ) -> Result<i64> {
        let spec_id = self.specifications.add_specification(specification).await?;
        let (child_id, _inserted) = self
            .add_one_record(specification.record_type(), spec_id, molecule_ids, tag, priority, None)
            .await?;
        self.records.link_dependency(parent_id, child_id, position).await?;
        Ok(child_id)
    }

    pub async fn query_records(&self, filter: RecordQuery) -> Result<RecordPage> {
        self.records.query_records(filter).await
    }

    pub async fn reset(&self, id: i64) -> Result<RecordRow> {
        let row = self.records.transition(id, StatusEvent::Reset).await?;
        self.tasks.remove(id).await.ok();
        self.re_enqueue(&row).await?;
        Ok(row)
    }

    /// Cancel applies from `waiting` or `running`. If the
    /// record is currently leased, the task row is removed; a later return
    /// from the manager is still accepted into history but ignored.
    pub async fn cancel(&self, id: i64) -> Result<RecordRow> {
        let row = self.records.transition(id, StatusEvent::Cancel).await?;
        self.tasks.remove(id).await.ok();
        self.services.remove(id).await.ok();
        Ok(row)
    }

    pub async fn uncancel(&self, id: i64) -> Result<RecordRow> {
        let row = self.records.transition(id, StatusEvent::Uncancel).await?;
        self.re_enqueue(&row).await?;
        Ok(row)
    }

    pub async fn invalidate(&self, id: i64) -> Result<RecordRow> {
        self.records.transition(id, StatusEvent::Invalidate).await
    }

    pub async fn uninvalidate(&self, id: i64) -> Result<RecordRow> {
        self.records.transition(id, StatusEvent::Uninvalidate).await
    }

    pub async fn soft_delete(&self, id: i64) -> Result<RecordRow> {
        self.records.transition(id, StatusEvent::SoftDelete).await
    }

    pub async fn undelete(&self, id: i64) -> Result<RecordRow> {
        let rows = self.records.get_records(&[id], false).await?;
        let previous = rows
            .into_iter()
            .flatten()
            .next()
            .and_then(|r| r.pre_delete_status)
            .ok_or_else(|| BrokerError::InvalidInput(format!("record {id} has no recorded pre-delete status")))?;
        self.records
            .transition(id, StatusEvent::Undelete(previous))
            .await
    }

    pub async fn hard_delete(&self, id: i64) -> Result<()> {
        self.records.hard_delete(id).await
    }

    pub async fn modify(&self, id: i64, new_tag: Option<String>, new_priority: Option<Priority>) -> Result<RecordRow> {
        let rows = self.records.get_records(&[id], false).await?;
        let row = rows
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| BrokerError::NotFound(format!("record {id}")))?;
        if !row.status.has_queue_row() {
            return Err(BrokerError::InvalidInput(format!(
                "record {id} has no task or service row to modify (status {})",
                row.status
            )));
        }
        self.records.modify(id, new_tag, new_priority).await
    }

    pub async fn add_comment(&self, id: i64, username: Option<String>, text: String) -> Result<()> {
        self.records.add_comment(id, username, text).await
    }

    /// Re-creates the task or service row a `waiting` record needs to be
    /// picked up again, since both are deleted on their terminal transition.
    pub(crate) async fn re_enqueue(&self, row: &RecordRow) -> Result<()> {
        if row.record_type.is_service() {
            self.services
                .create(row.id, &row.tag, row.priority, Value::Null)
                .await
        } else {
            self.tasks
                .enqueue(EnqueueTask {
                    record_id: row.id,
                    tag: row.tag.clone(),
                    priority: row.priority,
                    required_programs: Vec::new(),
                    required_capabilities: BTreeSet::new(),
                    payload: Value::Null,
                })
                .await
                .map(|_| ())
        }
    }

    /// Projects a `RecordRow` into the wire-level `Record` the web layer
    /// returns directly; kept in core so both `qcbroker-web` and the root
    /// integration tests share one projection.
    pub fn to_wire(row: RecordRow) -> Record {
        Record {
            id: row.id,
            record_type: row.record_type,
            status: row.status,
            specification_id: row.specification_id,
            molecule_ids: row.molecule_ids,
            tag: row.tag,
            priority: row.priority,
            owner_user: row.owner_user,
            manager_name: row.manager_name,
            created_on: row.created_on,
            modified_on: row.modified_on,
            comments: row.comments,
            compute_history: row.compute_history,
            outputs: row.outputs,
        }
    }
}

/// Helper re-exported for callers that need to check a manual transition is
/// legal before attempting a store round trip (used by `qcbroker-web`'s
/// validation layer to return `invalid_transition` without a write).
pub fn transition_is_legal(current: RecordStatus, event: StatusEvent) -> bool {
    status::apply(current, event).is_ok()
}
