//! Maps `CoreError` onto HTTP status codes and a small JSON body, the way
//! the legacy handlers standardized on RFC-7807-shaped error payloads,
//! reduced here to the handful of fields this thin router actually returns.

use crate::error::CoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    detail: String,
}

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            CoreError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "transient"),
            CoreError::Permanent(_) => (StatusCode::INTERNAL_SERVER_ERROR, "permanent"),
            CoreError::BackpressureFallback(_) => (StatusCode::OK, "backpressure_fallback"),
        };
        let body = ErrorBody {
            error: kind.to_string(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
