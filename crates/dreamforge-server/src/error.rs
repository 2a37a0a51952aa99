//! Maps [`DfError`] to HTTP at the edge only (§9: "map to HTTP at the edge
//! only"). Nothing upstream of a route handler ever constructs a status
//! code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dreamforge_core::error::DfError;
use serde_json::json;

pub struct ApiError(pub DfError);

impl From<DfError> for ApiError {
    fn from(err: DfError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DfError::InvalidInput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DfError::NotFound { .. } => StatusCode::NOT_FOUND,
            DfError::Conflict { .. } => StatusCode::CONFLICT,
            DfError::InfraUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DfError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_json() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
