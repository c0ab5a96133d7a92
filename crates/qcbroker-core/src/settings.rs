//! `ServerConfig` — the config layer shared by `qcbroker-core` (policy
//! values the runner and queue read) and `qcbroker-server` (which loads it
//! from `server.yaml`, see SPEC_FULL.md §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database_url: String,
    pub bind_address: String,
    /// Base lease/inactivity window in seconds; the effective lease is
    /// `heartbeat_timeout_seconds * heartbeat_timeout_multiplier`.
    pub heartbeat_timeout_seconds: u64,
    pub heartbeat_timeout_multiplier: u32,
    /// Internal Job Runner tick interval.
    pub service_tick_interval_seconds: u64,
    pub max_active_services: u32,
    pub auto_reset_limit: u32,
    /// Case-insensitive substrings of an error message that make a record
    /// eligible for auto-reset.
    pub retriable_error_substrings: Vec<String>,
    pub max_payload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/qcbroker".to_string(),
            bind_address: "0.0.0.0:7777".to_string(),
            heartbeat_timeout_seconds: 60,
            heartbeat_timeout_multiplier: 3,
            service_tick_interval_seconds: 60,
            max_active_services: 20,
            auto_reset_limit: 3,
            retriable_error_substrings: vec![
                "connection reset".to_string(),
                "timeout".to_string(),
                "out of memory".to_string(),
            ],
            max_payload_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Effective lease duration.
    pub fn lease_duration_seconds(&self) -> u64 {
        self.heartbeat_timeout_seconds * self.heartbeat_timeout_multiplier as u64
    }

    pub fn is_retriable(&self, error_message: &str) -> bool {
        let lower = error_message.to_lowercase();
        self.retriable_error_substrings
            .iter()
            .any(|substring| lower.contains(&substring.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_duration_multiplies_timeout_by_k() {
        let cfg = ServerConfig {
            heartbeat_timeout_seconds: 20,
            heartbeat_timeout_multiplier: 3,
            ..Default::default()
        };
        assert_eq!(cfg.lease_duration_seconds(), 60);
    }

    #[test]
    fn retriable_match_is_case_insensitive() {
        let cfg = ServerConfig::default();
        assert!(cfg.is_retriable("Connection RESET by peer"));
        assert!(!cfg.is_retriable("syntax error in input"));
    }
}
