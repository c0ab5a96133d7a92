//! Request/response DTOs for the wire protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Priority, RecordStatus, RecordType};
use crate::specification::Specification;

/// Per-element insert metadata shared by every bulk `add_*` endpoint
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertMetadata {
    pub inserted_idx: Vec<usize>,
    pub existing_idx: Vec<usize>,
    pub errors: Vec<(usize, String)>,
}

impl InsertMetadata {
    pub fn new() -> Self {
        Self {
            inserted_idx: Vec::new(),
            existing_idx: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl Default for InsertMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordRequest {
    pub molecule_ids: Vec<i64>,
    pub specification: Specification,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub priority: Priority,
}

pub fn default_tag() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordResponse {
    pub meta: InsertMetadata,
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkGetRequest {
    pub ids: Vec<i64>,
    #[serde(default)]
    pub missing_ok: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordQueryFilter {
    #[serde(default)]
    pub ids: Option<Vec<i64>>,
    #[serde(default)]
    pub status: Option<Vec<RecordStatus>>,
    #[serde(default)]
    pub record_type: Option<Vec<RecordType>>,
    #[serde(default)]
    pub manager_name: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner_user: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub skip: u32,
}

fn default_limit() -> u32 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRecordRequest {
    pub new_tag: Option<String>,
    pub new_priority: Option<Priority>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddCommentRequest {
    pub username: Option<String>,
    pub text: String,
}

/// Opaque pagination cursor: callers must pass it back verbatim rather than
/// construct or interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryCursor(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecordsResponse<T> {
    pub records: Vec<T>,
    pub next_cursor: Option<QueryCursor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoleculeQueryFilter {
    #[serde(default)]
    pub molecule_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub molecule_hash: Option<Vec<String>>,
    #[serde(default)]
    pub molecular_formula: Option<Vec<String>>,
    #[serde(default)]
    pub identifier: Option<(String, String)>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub skip: u32,
}
