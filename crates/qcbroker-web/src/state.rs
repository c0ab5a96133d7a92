//! Shared application state: one `Arc` per port-trait-backed
//! service plus the Postgres-specific `PgUserStore` auth lookup, handed to
//! every route handler as cloneable `axum` state.

use std::sync::Arc;

use qcbroker_core::manager_service::ManagerService;
use qcbroker_core::ports::{
    BlobStorePort, KeywordSetStore, ManagerRegistryPort, MoleculeStore, RecordStore,
    SpecificationStore,
};
use qcbroker_core::queue_service::QueueService;
use qcbroker_core::record_service::RecordService;
use qcbroker_core::settings::ServerConfig;
use qcbroker_postgres::PgUserStore;

#[derive(Clone)]
pub struct AppState {
    pub molecules: Arc<dyn MoleculeStore>,
    pub keyword_sets: Arc<dyn KeywordSetStore>,
    pub specifications: Arc<dyn SpecificationStore>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStorePort>,
    pub managers: Arc<dyn ManagerRegistryPort>,
    pub record_service: Arc<RecordService>,
    pub queue_service: Arc<QueueService>,
    pub manager_service: Arc<ManagerService>,
    pub users: Arc<PgUserStore>,
    pub config: Arc<ServerConfig>,
}
