//! Core error type. One variant per wire `ErrorKind`, each
//! carrying an `http_status()` so `qcbroker-web` never hand-rolls status
//! codes.

use qcbroker_types::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Not actually surfaced by `add_*` endpoints (those report
    /// `existing_idx` instead) — reserved for explicit create-unique flows.
    #[error("duplicate rejected: {0}")]
    DuplicateRejected(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("manager unknown: {0}")]
    ManagerUnknown(String),

    #[error("task not leased by this manager: {0}")]
    TaskNotLeased(String),

    #[error("internal error [{correlation_id}]: {source}")]
    Internal {
        correlation_id: uuid::Uuid,
        #[source]
        source: anyhow::Error,
    },
}

impl BrokerError {
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            correlation_id: uuid::Uuid::new_v4(),
            source: source.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::DuplicateRejected(_) => 409,
            Self::InvalidTransition(_) => 409,
            Self::InvalidInput(_) => 400,
            Self::PermissionDenied(_) => 403,
            Self::Conflict(_) => 409,
            Self::PayloadTooLarge(_) => 413,
            Self::ManagerUnknown(_) => 404,
            Self::TaskNotLeased(_) => 409,
            Self::Internal { .. } => 500,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::DuplicateRejected(_) => ErrorKind::DuplicateRejected,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Self::ManagerUnknown(_) => ErrorKind::ManagerUnknown,
            Self::TaskNotLeased(_) => ErrorKind::TaskNotLeased,
            Self::Internal { .. } => ErrorKind::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl From<anyhow::Error> for BrokerError {
    fn from(e: anyhow::Error) -> Self {
        Self::internal(e)
    }
}
