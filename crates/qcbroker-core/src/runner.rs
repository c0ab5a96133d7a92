//! Internal Job Runner: a periodic, single-tick driver.
//! `qcbroker-server` owns the `tokio::time::interval` loop and calls
//! `tick()` on a schedule; every sub-action here is its own method so it
//! can be exercised independently against a fake store in tests.

use std::sync::Arc;

use chrono::Utc;
use qcbroker_types::RecordStatus;
use tracing::{info, warn};

use crate::error::Result;
use crate::ports::{ManagerRegistryPort, RecordQuery, RecordStore, ServiceQueuePort, TaskQueuePort};
use crate::record_service::RecordService;
use crate::service_engine::ServiceEngine;
use crate::settings::ServerConfig;
use crate::status::StatusEvent;

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub services_iterated: u32,
    pub services_failed: u32,
    pub managers_reaped: u32,
    pub tasks_requeued: u32,
    pub records_auto_reset: u32,
    pub record_count_by_status: std::collections::BTreeMap<RecordStatus, u64>,
}

pub struct JobRunner {
    records: Arc<dyn RecordStore>,
    tasks: Arc<dyn TaskQueuePort>,
    services: Arc<dyn ServiceQueuePort>,
    managers: Arc<dyn ManagerRegistryPort>,
    service_engine: Arc<ServiceEngine>,
    record_service: Arc<RecordService>,
    config: ServerConfig,
}

impl JobRunner {
    pub fn new(
        records: Arc<dyn RecordStore>,
        tasks: Arc<dyn TaskQueuePort>,
        services: Arc<dyn ServiceQueuePort>,
        managers: Arc<dyn ManagerRegistryPort>,
        service_engine: Arc<ServiceEngine>,
        record_service: Arc<RecordService>,
        config: ServerConfig,
    ) -> Self {
        Self {
            records,
            tasks,
            services,
            managers,
            service_engine,
            record_service,
            config,
        }
    }

    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        let (iterated, failed) = self.service_tick().await?;
        report.services_iterated = iterated;
        report.services_failed = failed;

        report.managers_reaped = self.manager_reap().await?;
        report.tasks_requeued = self.requeue_expired_leases().await?;
        report.records_auto_reset = self.auto_reset().await?;
        report.record_count_by_status = self.stats_snapshot().await?;

        Ok(report)
    }

    /// Selects due services and iterates each one once. One failing service never blocks the rest.
    pub async fn service_tick(&self) -> Result<(u32, u32)> {
        let due = self
            .services
            .due(Utc::now(), self.config.max_active_services as u32)
            .await?;
        let mut iterated = 0;
        let mut failed = 0;
        for row in due {
            let record_id = row.record_id;
            match self.service_engine.iterate_one(row).await {
                Ok(()) => iterated += 1,
                Err(e) => {
                    warn!(record_id, error = %e, "service iteration failed");
                    failed += 1;
                }
            }
        }
        Ok((iterated, failed))
    }

    /// Marks heartbeat-expired managers inactive. Their leased tasks are freed separately by
    /// `requeue_expired_leases`, since a lease can outlive its owner's
    /// heartbeat window by design (k > 1).
    pub async fn manager_reap(&self) -> Result<u32> {
        let cutoff = Utc::now()
            - chrono::Duration::seconds(
                (self.config.heartbeat_timeout_seconds * self.config.heartbeat_timeout_multiplier as u64) as i64,
            );
        let reaped = self.managers.reap_expired(cutoff).await?;
        for manager in &reaped {
            info!(manager = %manager.name, "reaped inactive manager");
        }
        Ok(reaped.len() as u32)
    }

    /// Requeues tasks whose lease expired, independent of which manager
    /// held them.
    pub async fn requeue_expired_leases(&self) -> Result<u32> {
        let requeued = self.tasks.requeue_expired(Utc::now()).await?;
        for record_id in &requeued {
            info!(record_id, "task lease expired, requeued to waiting");
        }
        Ok(requeued.len() as u32)
    }

    /// Auto-reset: records in `error` whose most recent failure message
    /// matches a configured retriable substring and haven't exhausted
    /// `auto_reset_limit`.
    pub async fn auto_reset(&self) -> Result<u32> {
        let page = self
            .records
            .query_records(RecordQuery {
                status: Some(vec![RecordStatus::Error]),
                limit: 500,
                ..Default::default()
            })
            .await?;

        let mut reset_count = 0;
        for row in page.records {
            if row.resets_used >= self.config.auto_reset_limit {
                continue;
            }
            let Some(last) = row.compute_history.last() else {
                continue;
            };
            let message = last
                .provenance
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            if self.config.is_retriable(&message) {
                self.records.transition(row.id, StatusEvent::Reset).await?;
                self.tasks.remove(row.id).await.ok();
                self.record_service.re_enqueue(&row).await?;
                reset_count += 1;
                info!(record_id = row.id, "auto-reset applied");
            }
        }
        Ok(reset_count)
    }

    pub async fn stats_snapshot(&self) -> Result<std::collections::BTreeMap<RecordStatus, u64>> {
        self.records.count_by_status().await
    }
}
