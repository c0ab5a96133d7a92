//! In-process pool manager:
//! spins up `n` fake workers inside the server process for exercising the
//! claim/heartbeat/return cycle without standing up a real compute worker.
//! Declares every program at version `*` and the wildcard tag, so it
//! happily drains whatever is queued — good enough for smoke-testing a
//! fresh `server init` but never meant for a production deployment.

use std::collections::BTreeMap;
use std::time::Duration;

use qcbroker_types::manager::{RegisterManagerRequest, TaskReturn};
use qcbroker_web::AppState;
use serde_json::json;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn spawn(state: AppState, count: u32) {
    for worker in 0..count {
        let state = state.clone();
        tokio::spawn(async move { run_worker(state, worker).await });
    }
}

async fn run_worker(state: AppState, worker: u32) {
    let name = format!("local-manager-{worker}");
    let request = RegisterManagerRequest {
        name: name.clone(),
        cluster: "local".to_string(),
        hostname: "in-process".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tags: vec![qcbroker_types::WILDCARD_TAG.to_string()],
        programs: BTreeMap::new(),
    };
    if let Err(e) = state.manager_service.register(request, &state.config).await {
        warn!(manager = %name, error = %e, "local manager failed to register");
        return;
    }
    info!(manager = %name, "local manager registered");

    let heartbeat_interval = Duration::from_secs(state.config.heartbeat_timeout_seconds.max(1) / 2);
    let mut last_heartbeat = tokio::time::Instant::now();

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        if last_heartbeat.elapsed() >= heartbeat_interval {
            if let Err(e) = state.queue_service.heartbeat(&name, &BTreeMap::new()).await {
                warn!(manager = %name, error = %e, "local manager heartbeat failed");
            }
            last_heartbeat = tokio::time::Instant::now();
        }

        let claimed = match state.queue_service.claim(&name, &[qcbroker_types::WILDCARD_TAG.to_string()], &BTreeMap::new(), 4).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(manager = %name, error = %e, "local manager claim failed");
                continue;
            }
        };
        if claimed.is_empty() {
            continue;
        }

        let mut results = BTreeMap::new();
        for task in claimed {
            info!(manager = %name, task_id = task.task_id, "local manager completing task");
            results.insert(task.task_id, TaskReturn::Success { return_result: json!(0.0) });
        }
        if let Err(e) = state.queue_service.apply_returns(&name, results).await {
            warn!(manager = %name, error = %e, "local manager return failed");
        }
    }
}
