//! Record — the wire-level view of a persisted computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tagged variant discriminator. See REDESIGN FLAGS: this
/// replaces a dynamic class hierarchy with a single enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Singlepoint,
    Optimization,
    Gridoptimization,
    Torsiondrive,
    Manybody,
    Reaction,
    Neb,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Singlepoint => "singlepoint",
            Self::Optimization => "optimization",
            Self::Gridoptimization => "gridoptimization",
            Self::Torsiondrive => "torsiondrive",
            Self::Manybody => "manybody",
            Self::Reaction => "reaction",
            Self::Neb => "neb",
        }
    }

    /// Task-based record types drive a `Task` row and run atomically on one
    /// manager; the rest drive a `Service` row, iterated by the Internal Job
    /// Runner. An optimization runs its optimizer program (e.g. geomeTRIC)
    /// entirely on the claiming manager, the same as a singlepoint — only
    /// the workflows that fan out into multiple child records are services
    ///.
    pub fn is_service(&self) -> bool {
        matches!(
            self,
            Self::Gridoptimization | Self::Torsiondrive | Self::Manybody | Self::Reaction | Self::Neb
        )
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record lifecycle status. Exhaustive — the state machine in
/// `qcbroker-core::status` matches on every arm with no catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Waiting,
    Running,
    Complete,
    Error,
    Cancelled,
    Invalid,
    Deleted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Invalid => "invalid",
            Self::Deleted => "deleted",
        }
    }

    /// Terminal in the absence of user action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Invalid | Self::Cancelled | Self::Deleted)
    }

    /// True while a task or service row should exist for this record.
    pub fn has_queue_row(&self) -> bool {
        matches!(self, Self::Waiting | Self::Running)
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// One entry in a record's free-text comment trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub timestamp: DateTime<Utc>,
    pub username: Option<String>,
    pub text: String,
}

/// One entry in a record's compute-history list — what a manager reported
/// back, success or failure, appended (never overwritten) on every return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeHistoryEntry {
    pub manager_name: Option<String>,
    pub status: ComputeOutcome,
    pub modified_on: DateTime<Utc>,
    pub provenance: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ComputeOutcome {
    Success,
    Error,
    IgnoredAfterCancel,
}

/// Opaque, record-type-dependent outputs. The engine never interprets these
/// structurally beyond the named fields a `ServiceVariant` driver reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordOutputs {
    pub return_result: Option<f64>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Value>,
    pub wavefunction_blob_id: Option<i64>,
    pub stdout_blob_id: Option<i64>,
    pub stderr_blob_id: Option<i64>,
    pub error_blob_id: Option<i64>,
    /// Variant-specific payload, e.g. a torsiondrive's per-angle energies or
    /// a NEB's converged image chain. Read lazily by the owning variant.
    #[serde(default)]
    pub extra: serde_json::Map<String, Value>,
}

/// Record-level view returned over the wire. Common fields live at the top
/// level; variant-specific shape lives in `outputs.extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub record_type: RecordType,
    pub status: RecordStatus,
    pub specification_id: i64,
    pub molecule_ids: Vec<i64>,
    pub tag: String,
    pub priority: Priority,
    pub owner_user: Option<String>,
    pub manager_name: Option<String>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub comments: Vec<Comment>,
    pub compute_history: Vec<ComputeHistoryEntry>,
    pub outputs: RecordOutputs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_exactly_four() {
        let terminal: Vec<_> = [
            RecordStatus::Waiting,
            RecordStatus::Running,
            RecordStatus::Complete,
            RecordStatus::Error,
            RecordStatus::Cancelled,
            RecordStatus::Invalid,
            RecordStatus::Deleted,
        ]
        .into_iter()
        .filter(RecordStatus::is_terminal)
        .collect();
        assert_eq!(terminal.len(), 4);
    }

    #[test]
    fn only_waiting_and_running_have_queue_rows() {
        assert!(RecordStatus::Waiting.has_queue_row());
        assert!(RecordStatus::Running.has_queue_row());
        assert!(!RecordStatus::Complete.has_queue_row());
    }

    #[test]
    fn priority_orders_low_lt_normal_lt_high() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
    }
}
