//! Manager Registry façade: registration and listing.
//! Reap (heartbeat-loss detection) lives in `runner`, which is the only
//! caller that needs `reap_expired` + `requeue_expired` together.

use std::sync::Arc;

use qcbroker_types::{ManagerSummary, RegisterManagerRequest, RegisterManagerResponse};

use crate::error::Result;
use crate::ports::ManagerRegistryPort;
use crate::settings::ServerConfig;

pub struct ManagerService {
    managers: Arc<dyn ManagerRegistryPort>,
}

impl ManagerService {
    pub fn new(managers: Arc<dyn ManagerRegistryPort>) -> Self {
        Self { managers }
    }

    pub async fn register(
        &self,
        request: RegisterManagerRequest,
        config: &ServerConfig,
    ) -> Result<RegisterManagerResponse> {
        let manager_id = self.managers.register(request).await?;
        Ok(RegisterManagerResponse {
            manager_id,
            heartbeat_interval_seconds: config.heartbeat_timeout_seconds,
        })
    }

    pub async fn get(&self, name: &str) -> Result<Option<ManagerSummary>> {
        self.managers.get(name).await
    }

    pub async fn list(&self) -> Result<Vec<ManagerSummary>> {
        self.managers.list().await
    }
}
