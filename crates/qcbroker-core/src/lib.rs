//! qcbroker-core — the compute broker's engine: hashing, port traits, the
//! record state machine, the service engine and its variants, and the
//! Internal Job Runner. Nothing in this crate depends on `sqlx` or `axum`;
//! `qcbroker-postgres` and `qcbroker-web` build on the traits in `ports`.

pub mod error;
pub mod hashing;
pub mod manager_service;
pub mod ports;
pub mod principal;
pub mod record_service;
pub mod queue_service;
pub mod runner;
pub mod service_engine;
pub mod settings;
pub mod status;
pub mod variants;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{BrokerError, Result};
pub use manager_service::ManagerService;
pub use queue_service::QueueService;
pub use record_service::RecordService;
pub use runner::{JobRunner, TickReport};
pub use service_engine::{ServiceEngine, ServiceVariantRegistry};
pub use settings::ServerConfig;
