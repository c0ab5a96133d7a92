//! Record endpoints: submission, lookup, query, mutation.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use qcbroker_core::error::BrokerError;
use qcbroker_core::ports::RecordQuery;
use qcbroker_core::principal::{Permission, Principal};
use qcbroker_core::record_service::RecordService;
use qcbroker_types::api::{
    AddCommentRequest, AddRecordRequest, AddRecordResponse, BulkGetRequest, InsertMetadata,
    ModifyRecordRequest, QueryCursor, QueryRecordsResponse, RecordQueryFilter,
};
use qcbroker_types::{Record, RecordType};
use serde::Deserialize;

use crate::auth::require;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/records/:record_type", post(add_records))
        .route("/records/bulkGet", post(bulk_get))
        .route("/records/query", post(query_records))
        .route("/records/:id", get(get_record))
        .route("/records/:id/modify", post(modify))
        .route("/records/:id/comment", post(add_comment))
        .route("/records/:id/reset", post(reset))
        .route("/records/:id/cancel", post(cancel))
        .route("/records/:id/uncancel", post(uncancel))
        .route("/records/:id/invalidate", post(invalidate))
        .route("/records/:id/uninvalidate", post(uninvalidate))
        .route("/records/:id/delete", post(soft_delete))
        .route("/records/:id/undelete", post(undelete))
}

fn parse_record_type(s: &str) -> Result<RecordType, AppError> {
    let found = [
        RecordType::Singlepoint,
        RecordType::Optimization,
        RecordType::Gridoptimization,
        RecordType::Torsiondrive,
        RecordType::Manybody,
        RecordType::Reaction,
        RecordType::Neb,
    ]
    .into_iter()
    .find(|rt| rt.as_str() == s);
    found.ok_or_else(|| AppError(BrokerError::InvalidInput(format!("unknown record type '{s}'"))))
}

async fn add_records(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(record_type): Path<String>,
    Json(request): Json<AddRecordRequest>,
) -> Result<Json<AddRecordResponse>, AppError> {
    require(&principal, Permission::Compute)?;
    let parsed = parse_record_type(&record_type)?;
    if parsed != request.specification.record_type() {
        return Err(AppError(BrokerError::InvalidInput(format!(
            "path record type '{record_type}' does not match specification's record type '{}'",
            request.specification.record_type()
        ))));
    }
    let outcome = state
        .record_service
        .add_records(&request.molecule_ids, &request.specification, &request.tag, request.priority, None)
        .await?;
    Ok(Json(AddRecordResponse {
        ids: outcome.ids,
        meta: InsertMetadata {
            inserted_idx: outcome.inserted_idx,
            existing_idx: outcome.existing_idx,
            errors: outcome.errors,
        },
    }))
}

async fn get_record(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
) -> Result<Json<Record>, AppError> {
    require(&principal, Permission::Read)?;
    let rows = state.record_service.get_records(&[id], false).await?;
    let row = rows
        .into_iter()
        .flatten()
        .next()
        .ok_or_else(|| AppError(BrokerError::NotFound(format!("record {id}"))))?;
    Ok(Json(RecordService::to_wire(row)))
}

async fn bulk_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<BulkGetRequest>,
) -> Result<Json<Vec<Option<Record>>>, AppError> {
    require(&principal, Permission::Read)?;
    let rows = state.record_service.get_records(&request.ids, request.missing_ok).await?;
    Ok(Json(rows.into_iter().map(|r| r.map(RecordService::to_wire)).collect()))
}

#[derive(Debug, Deserialize)]
struct Cursor {
    skip: u32,
}

async fn query_records(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(cursor): Query<Cursor>,
    Json(filter): Json<RecordQueryFilter>,
) -> Result<Json<QueryRecordsResponse<Record>>, AppError> {
    require(&principal, Permission::Read)?;
    let query = RecordQuery {
        ids: filter.ids,
        status: filter.status,
        record_type: filter.record_type,
        manager_name: filter.manager_name,
        tag: filter.tag,
        created_before: filter.created_before,
        created_after: filter.created_after,
        modified_before: filter.modified_before,
        modified_after: filter.modified_after,
        owner_user: filter.owner_user,
        limit: filter.limit,
        skip: filter.skip.max(cursor.skip),
    };
    let page = state.record_service.query_records(query).await?;
    Ok(Json(QueryRecordsResponse {
        records: page.records.into_iter().map(RecordService::to_wire).collect(),
        next_cursor: page.next_skip.map(|s| QueryCursor(s.to_string())),
    }))
}

async fn modify(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(request): Json<ModifyRecordRequest>,
) -> Result<Json<Record>, AppError> {
    require(&principal, Permission::Write)?;
    let row = state.record_service.modify(id, request.new_tag, request.new_priority).await?;
    Ok(Json(RecordService::to_wire(row)))
}

async fn add_comment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<i64>,
    Json(request): Json<AddCommentRequest>,
) -> Result<(), AppError> {
    require(&principal, Permission::Write)?;
    state.record_service.add_comment(id, request.username, request.text).await?;
    Ok(())
}

macro_rules! transition_route {
    ($name:ident, $method:ident, $permission:expr) => {
        async fn $name(
            State(state): State<AppState>,
            Extension(principal): Extension<Principal>,
            Path(id): Path<i64>,
        ) -> Result<Json<Record>, AppError> {
            require(&principal, $permission)?;
            let row = state.record_service.$method(id).await?;
            Ok(Json(RecordService::to_wire(row)))
        }
    };
}

transition_route!(reset, reset, Permission::Write);
transition_route!(cancel, cancel, Permission::Write);
transition_route!(uncancel, uncancel, Permission::Write);
transition_route!(invalidate, invalidate, Permission::Write);
transition_route!(uninvalidate, uninvalidate, Permission::Write);
transition_route!(soft_delete, soft_delete, Permission::Write);
transition_route!(undelete, undelete, Permission::Write);
