//! Bearer-token auth middleware: a plain opaque-token lookup against
//! `PgUserStore`, since this broker has no signing key to validate against.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use qcbroker_core::error::BrokerError;
use qcbroker_core::principal::{Permission, Principal};
use serde_json::json;

use crate::state::AppState;

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "kind": "permission_denied", "message": message }))).into_response()
}

/// Resolves `Authorization: Bearer <token>` into a `Principal` and inserts it
/// into request extensions. Applied globally in `build_router`; individual
/// handlers call `require` for the permission they need.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, Response> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing Authorization header"))?;

    let token = header_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("expected 'Bearer <token>'"))?;

    let principal = state
        .users
        .resolve(token)
        .await
        .map_err(|e| crate::error::AppError(e).into_response())?
        .ok_or_else(|| unauthorized("unknown token"))?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Handler-level permission gate.
pub fn require(principal: &Principal, permission: Permission) -> Result<(), BrokerError> {
    if principal.has(permission) {
        Ok(())
    } else {
        Err(BrokerError::PermissionDenied(format!(
            "{} lacks {}",
            principal.username,
            permission.as_str()
        )))
    }
}
