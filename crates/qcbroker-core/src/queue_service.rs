//! Task Queue façade: claim, heartbeat, and return, wired to
//! also drive the owning record through the state machine and notify
//! parent services when a child finishes.

use std::collections::BTreeMap;
use std::sync::Arc;

use qcbroker_types::{ClaimedTask, ManagerStatus, TaskReturn};

use crate::error::Result;
use crate::ports::{ManagerRegistryPort, RecordStore, ReturnOutcome, TaskQueuePort};
use crate::status::StatusEvent;

pub struct QueueService {
    tasks: Arc<dyn TaskQueuePort>,
    records: Arc<dyn RecordStore>,
    managers: Arc<dyn ManagerRegistryPort>,
}

impl QueueService {
    pub fn new(
        tasks: Arc<dyn TaskQueuePort>,
        records: Arc<dyn RecordStore>,
        managers: Arc<dyn ManagerRegistryPort>,
    ) -> Self {
        Self {
            tasks,
            records,
            managers,
        }
    }

    /// `claim` is the atomic, serialized step of the claim protocol: the adapter
    /// is responsible for `FOR UPDATE SKIP LOCKED`-style isolation. This
    /// layer only applies the state-machine and bookkeeping side effects
    /// once the adapter hands back the winning set.
    pub async fn claim(
        &self,
        manager_name: &str,
        tags: &[String],
        programs: &BTreeMap<String, String>,
        limit: u32,
    ) -> Result<Vec<ClaimedTask>> {
        let claimed = self.tasks.claim(manager_name, tags, programs, limit).await?;
        for task in &claimed {
            self.records.transition(task.record_id, StatusEvent::Claim).await?;
        }
        if !claimed.is_empty() {
            self.managers.record_claim(manager_name, claimed.len() as u64).await?;
        }
        Ok(claimed)
    }

    pub async fn heartbeat(&self, manager_name: &str, status_counts: &BTreeMap<String, u64>) -> Result<(ManagerStatus, u64)> {
        self.managers.record_heartbeat(manager_name, status_counts).await?;
        let extended = self.tasks.heartbeat_extend(manager_name).await?;
        Ok((ManagerStatus::Active, extended))
    }

    /// Applies a batch return. Success transitions the
    /// record to `complete`; failure to `error`. Returns for tasks not
    /// currently leased by `manager_name` are rejected (counted, recorded
    /// nowhere else) and never touch the record.
    pub async fn apply_returns(
        &self,
        manager_name: &str,
        results: BTreeMap<i64, TaskReturn>,
    ) -> Result<ReturnOutcome> {
        let outcome = self.tasks.apply_returns(manager_name, results.clone()).await?;
        for (task_id, accepted) in &outcome.accepted {
            if !*accepted {
                continue;
            }
            let Some(result) = results.get(task_id) else {
                continue;
            };
            let event = match result {
                TaskReturn::Success { .. } => StatusEvent::SuccessReturn,
                TaskReturn::Error { .. } => StatusEvent::ErrorReturn,
            };
            // Tasks are 1:1 with their record, so `task_id`
            // doubles as the record id here. `apply_returns` already
            // persisted the compute-history entry and outputs regardless
            // of status; a cancelled record rejects this transition (no
            // `Cancelled -> Complete/Error` arm) and we swallow that, which
            // is exactly "recorded in history, status stays cancelled"
            //.
            let _ = self.records.transition(*task_id, event).await;
        }
        let succeeded = outcome.accepted.values().filter(|v| **v).count() as u64;
        if succeeded > 0 {
            self.managers.record_completion(manager_name, true).await?;
        }
        Ok(outcome)
    }

    pub async fn cancel_leased(&self, record_id: i64) -> Result<()> {
        self.tasks.remove(record_id).await
    }
}
