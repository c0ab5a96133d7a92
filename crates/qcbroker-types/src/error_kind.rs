//! Wire-level error shape: `{kind, message, context}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    DuplicateRejected,
    InvalidTransition,
    InvalidInput,
    PermissionDenied,
    Conflict,
    PayloadTooLarge,
    ManagerUnknown,
    TaskNotLeased,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}
