//! Manager — wire types for the worker registration/claim/heartbeat/return
//! protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx-types", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx-types", sqlx(type_name = "text", rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    Active,
    Inactive,
}

/// A tag a manager declared it will serve, in priority order. `*` is the
/// wildcard that also matches a task's own `*` tag.
pub const WILDCARD_TAG: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterManagerRequest {
    pub name: String,
    pub cluster: String,
    pub hostname: String,
    pub version: String,
    /// Ordered; claim() walks this list in order.
    pub tags: Vec<String>,
    /// Program name -> version string, e.g. `{"psi4": "1.9"}`.
    pub programs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterManagerResponse {
    pub manager_id: i64,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub name: String,
    #[serde(default)]
    pub status_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: ManagerStatus,
    pub active_task_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub name: String,
    pub limit: u32,
}

/// A program requirement attached to a task: satisfied when the claiming
/// manager's declared version for `name` is `>=` this minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRequirement {
    pub name: String,
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub task_id: i64,
    pub record_id: i64,
    pub payload: Value,
    pub required_programs: Vec<ProgramRequirement>,
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub tasks: Vec<ClaimedTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskReturn {
    Success { return_result: Value },
    Error { error: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub name: String,
    pub results: BTreeMap<i64, TaskReturn>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnResponse {
    /// task_id -> whether the return was accepted against a live lease.
    pub accepted: BTreeMap<i64, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSummary {
    pub id: i64,
    pub name: String,
    pub cluster: String,
    pub hostname: String,
    pub version: String,
    pub tags: Vec<String>,
    pub programs: BTreeMap<String, String>,
    pub status: ManagerStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub claimed_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
}
