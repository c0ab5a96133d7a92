//! Internal administrative endpoints and blob retrieval for stdout/stderr/error
//! payloads.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::get,
    Extension, Json, Router,
};
use qcbroker_core::error::BrokerError;
use qcbroker_core::principal::{Permission, Principal};
use qcbroker_types::{BlobPayload, RecordStatus};

use crate::auth::require;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/stats", get(stats))
        .route("/admin/blobs/:id", get(get_blob))
}

async fn stats(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<BTreeMap<RecordStatus, u64>>, AppError> {
    require(&principal, Permission::Admin)?;
    Ok(Json(state.records.count_by_status().await?))
}

async fn get_blob(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<BlobPayload>, AppError> {
    require(&principal, Permission::Read)?;
    let blob = state
        .blobs
        .get(id)
        .await?
        .ok_or_else(|| BrokerError::NotFound(format!("blob {id}")))?;
    Ok(Json(blob))
}
