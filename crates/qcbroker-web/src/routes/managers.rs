//! Manager endpoints: register, heartbeat, claim, return.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use qcbroker_core::error::BrokerError;
use qcbroker_core::principal::{Permission, Principal};
use qcbroker_types::manager::{
    ClaimRequest, ClaimResponse, HeartbeatRequest, HeartbeatResponse, ManagerSummary,
    RegisterManagerRequest, RegisterManagerResponse, ReturnRequest, ReturnResponse,
};

use crate::auth::require;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/managers/register", post(register))
        .route("/managers/heartbeat", post(heartbeat))
        .route("/managers/claim", post(claim))
        .route("/managers/return", post(apply_return))
        .route("/managers", get(list))
        .route("/managers/:name", get(get_manager))
}

async fn register(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<RegisterManagerRequest>,
) -> Result<Json<RegisterManagerResponse>, AppError> {
    require(&principal, Permission::Queue)?;
    let response = state.manager_service.register(request, &state.config).await?;
    Ok(Json(response))
}

async fn heartbeat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, AppError> {
    require(&principal, Permission::Queue)?;
    let (status, active_task_count) = state.queue_service.heartbeat(&request.name, &request.status_counts).await?;
    Ok(Json(HeartbeatResponse { status, active_task_count }))
}

async fn claim(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, AppError> {
    require(&principal, Permission::Queue)?;
    let manager = state
        .manager_service
        .get(&request.name)
        .await?
        .ok_or_else(|| BrokerError::ManagerUnknown(request.name.clone()))?;
    let tasks = state
        .queue_service
        .claim(&request.name, &manager.tags, &manager.programs, request.limit)
        .await?;
    Ok(Json(ClaimResponse { tasks }))
}

async fn apply_return(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<ReturnRequest>,
) -> Result<Json<ReturnResponse>, AppError> {
    require(&principal, Permission::Queue)?;
    let outcome = state.queue_service.apply_returns(&request.name, request.results).await?;
    Ok(Json(ReturnResponse { accepted: outcome.accepted }))
}

async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<ManagerSummary>>, AppError> {
    require(&principal, Permission::Admin)?;
    Ok(Json(state.manager_service.list().await?))
}

async fn get_manager(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> Result<Json<ManagerSummary>, AppError> {
    require(&principal, Permission::Admin)?;
    let manager = state
        .manager_service
        .get(&name)
        .await?
        .ok_or_else(|| BrokerError::ManagerUnknown(name))?;
    Ok(Json(manager))
}
