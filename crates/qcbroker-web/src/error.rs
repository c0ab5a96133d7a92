//! Maps `BrokerError` to the wire error shape: a newtype implementing
//! `IntoResponse` so every handler can just use `?`.

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use qcbroker_core::error::BrokerError;
use qcbroker_types::ErrorBody;

pub struct AppError(pub BrokerError);

impl From<BrokerError> for AppError {
    fn from(e: BrokerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            kind: self.0.kind(),
            message: self.0.to_string(),
            context: serde_json::Map::new(),
        };
        (status, Json(body)).into_response()
    }
}
