//! Service Engine: the per-variant iterate loop. The
//! Internal Job Runner selects due services and calls `iterate_one` here
//! once per service per tick; this module never decides *which* services
//! are due, only what happens once one is picked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qcbroker_types::{Priority, RecordOutputs, RecordStatus, RecordType, Specification};
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::ports::{BlobStorePort, RecordStore, ServiceQueuePort, ServiceRow, SpecificationStore};
use crate::record_service::RecordService;
use crate::status::StatusEvent;

/// What `initialize` receives: the service's own spec and its declared
/// input molecules, before any children exist.
pub struct RecordInputs {
    pub molecule_ids: Vec<i64>,
}

/// A terminal child's outcome, as the variant driver sees it.
#[derive(Debug, Clone)]
pub struct ChildOutcome {
    pub record_id: i64,
    pub status: RecordStatus,
    pub outputs: RecordOutputs,
}

/// A child a variant wants spawned this iteration. Molecule ids are either
/// carried over from a prior child's outputs (e.g. a converged geometry) or
/// from the parent's own inputs.
#[derive(Debug, Clone)]
pub struct NewChildRequest {
    pub specification: Specification,
    pub molecule_ids: Vec<i64>,
}

pub enum IterateOutcome {
    /// Terminal: the parent record finalizes with these outputs.
    Done { outputs: RecordOutputs },
    /// Spawn `new_children` (may be empty, e.g. while still waiting on
    /// stragglers is not legal here — `due()` already only surfaces
    /// services whose children are all terminal, so empty means the
    /// variant chose to wait an extra tick without changing state, which
    /// violates forward-progress and is rejected by the engine).
    Continue {
        new_children: Vec<NewChildRequest>,
        next_due_at: DateTime<Utc>,
        /// The variant's updated iterate-state, persisted verbatim by the
        /// engine. Opaque to everything but the owning variant.
        next_state: Value,
    },
    Error { message: String },
}

pub struct ServiceContext<'a> {
    pub record_id: i64,
    pub tag: &'a str,
    pub priority: Priority,
    pub iteration: u32,
}

#[async_trait]
pub trait ServiceVariant: Send + Sync {
    fn record_type(&self) -> RecordType;

    fn initialize(&self, specification: &Specification, inputs: &RecordInputs) -> Result<Value>;

    /// Whether an errored child aborts the service outright. Default: intolerant.
    fn tolerates_child_error(&self) -> bool {
        false
    }

    async fn iterate(
        &self,
        ctx: &ServiceContext<'_>,
        state: Value,
        completed_children: &[ChildOutcome],
    ) -> Result<IterateOutcome>;
}

#[derive(Default)]
pub struct ServiceVariantRegistry {
    variants: HashMap<RecordType, Arc<dyn ServiceVariant>>,
}

impl ServiceVariantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, variant: Arc<dyn ServiceVariant>) {
        self.variants.insert(variant.record_type(), variant);
    }

    pub fn get(&self, record_type: RecordType) -> Option<Arc<dyn ServiceVariant>> {
        self.variants.get(&record_type).cloned()
    }
}

pub struct ServiceEngine {
    services: Arc<dyn ServiceQueuePort>,
    records: Arc<dyn RecordStore>,
    specifications: Arc<dyn SpecificationStore>,
    blobs: Arc<dyn BlobStorePort>,
    record_service: Arc<RecordService>,
    registry: ServiceVariantRegistry,
}

impl ServiceEngine {
    pub fn new(
        services: Arc<dyn ServiceQueuePort>,
        records: Arc<dyn RecordStore>,
        specifications: Arc<dyn SpecificationStore>,
        blobs: Arc<dyn BlobStorePort>,
        record_service: Arc<RecordService>,
        registry: ServiceVariantRegistry,
    ) -> Self {
        Self {
            services,
            records,
            specifications,
            blobs,
            record_service,
            registry,
        }
    }

    /// Drives one due service one step.
    pub async fn iterate_one(&self, row: ServiceRow) -> Result<()> {
        let record = self
            .records
            .get_records(&[row.record_id], false)
            .await?
            .into_iter()
            .flatten()
            .next()
            .ok_or_else(|| BrokerError::NotFound(format!("service record {}", row.record_id)))?;

        let variant = self.registry.get(record.record_type).ok_or_else(|| {
            BrokerError::internal(anyhow::anyhow!(
                "no ServiceVariant registered for {}",
                record.record_type
            ))
        })?;

        // First due tick: move off `Waiting` so the terminal `SuccessReturn`/
        // `ErrorReturn` transitions below are legal. A later tick finds the
        // record already `Running` and this is a no-op.
        if record.status == RecordStatus::Waiting {
            self.records.transition(row.record_id, StatusEvent::Claim).await?;
        }

        let children = self
            .records
            .get_records(&row.pending_children, true)
            .await?;
        let outcomes: Vec<ChildOutcome> = children
            .into_iter()
            .flatten()
            .map(|child| ChildOutcome {
                record_id: child.id,
                status: child.status,
                outputs: child.outputs,
            })
            .collect();

        let has_error = outcomes.iter().any(|c| c.status == RecordStatus::Error);
        if has_error && !variant.tolerates_child_error() {
            let failing: Vec<i64> = outcomes
                .iter()
                .filter(|c| c.status == RecordStatus::Error)
                .map(|c| c.record_id)
                .collect();
            self.append_log(row.record_id, &format!(
                "iteration {}: aborting, child(ren) {:?} errored",
                row.iteration, failing
            ))
            .await?;
            self.records.transition(row.record_id, StatusEvent::ErrorReturn).await?;
            self.services.remove(row.record_id).await?;
            return Ok(());
        }

        let ctx = ServiceContext {
            record_id: row.record_id,
            tag: &row.tag,
            priority: row.priority,
            iteration: row.iteration,
        };

        // A service row is created with `iterate_state = null`: the variant never sees that sentinel, only its own
        // `initialize()` output, produced once on the first due tick.
        let state = if row.iteration == 0 && row.iterate_state.is_null() {
            let specification = self
                .specifications
                .get_specification(record.specification_id)
                .await?
                .ok_or_else(|| BrokerError::NotFound(format!("specification {}", record.specification_id)))?;
            let inputs = RecordInputs {
                molecule_ids: record.molecule_ids.clone(),
            };
            variant.initialize(&specification, &inputs)?
        } else {
            row.iterate_state.clone()
        };

        match variant.iterate(&ctx, state, &outcomes).await {
            Ok(IterateOutcome::Done { outputs }) => {
                self.append_log(row.record_id, &format!("iteration {}: done", row.iteration))
                    .await?;
                self.records.set_outputs(row.record_id, outputs).await?;
                self.records.transition(row.record_id, StatusEvent::SuccessReturn).await?;
                self.services.remove(row.record_id).await?;
            }
            Ok(IterateOutcome::Continue { new_children, next_due_at, next_state }) => {
                if new_children.is_empty() {
                    // No progress without either a growing child set, a
                    // state change, or termination.
                    return Err(BrokerError::internal(anyhow::anyhow!(
                        "service {} iteration {} made no progress",
                        row.record_id,
                        row.iteration
                    )));
                }
                let mut child_ids = Vec::with_capacity(new_children.len());
                for (position, request) in new_children.into_iter().enumerate() {
                    let id = self
                        .record_service
                        .add_child_record(
                            row.record_id,
                            &request.specification,
                            request.molecule_ids,
                            &row.tag,
                            row.priority,
                            position as u32,
                        )
                        .await?;
                    child_ids.push(id);
                }
                self.append_log(row.record_id, &format!(
                    "iteration {}: spawned {} children",
                    row.iteration,
                    child_ids.len()
                ))
                .await?;
                self.services
                    .update_state(row.record_id, next_state, child_ids, next_due_at)
                    .await?;
            }
            Ok(IterateOutcome::Error { message }) => {
                self.append_log(row.record_id, &format!("iteration {}: error: {message}", row.iteration))
                    .await?;
                self.records.transition(row.record_id, StatusEvent::ErrorReturn).await?;
                self.services.remove(row.record_id).await?;
            }
            Err(e) => {
                self.append_log(row.record_id, &format!("iteration {}: panic-equivalent error: {e}", row.iteration))
                    .await?;
                self.records.transition(row.record_id, StatusEvent::ErrorReturn).await?;
                self.services.remove(row.record_id).await?;
            }
        }
        Ok(())
    }

    async fn append_log(&self, record_id: i64, line: &str) -> Result<()> {
        let rows = self.records.get_records(&[record_id], true).await?;
        let current_blob = rows.into_iter().flatten().next().and_then(|r| r.outputs.stdout_blob_id);
        let blob_id = self.blobs.append_text(current_blob, line).await?;
        self.records.set_stdout_blob(record_id, blob_id).await
    }
}
