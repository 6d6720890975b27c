//! API error type and its mapping onto HTTP status codes.
//!
//! Every non-2xx response body is `{"error": "..."}`. Storage errors keep a
//! short message on the wire; the detail goes to the log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::kernel::KernelError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(entity: &str) -> Self {
        Self::NotFound(format!("{entity} not found"))
    }
}

impl From<KernelError> for ApiError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Validation(message) => Self::Validation(message),
            KernelError::NotFound(entity) => Self::not_found(entity),
            KernelError::InvalidState(message) => Self::Conflict(message),
            KernelError::LeaseMismatch => Self::Conflict("Lease mismatch".to_string()),
            KernelError::DuplicateIdempotency => {
                Self::Conflict("idempotency key already in use".to_string())
            }
            KernelError::Storage(source) => {
                error!(error = %source, "storage error");
                Self::Internal("transient storage error".to_string())
            }
            KernelError::Migrate(source) => {
                error!(error = %source, "migration error");
                Self::Internal("transient storage error".to_string())
            }
            KernelError::Serde(source) => {
                error!(error = %source, "serialization error");
                Self::Internal("serialization error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
