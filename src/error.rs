//! Unified request error type.
//!
//! Handlers return `Result<T, ApiError>`; the `IntoResponse` impl converts
//! each variant to a JSON-body response with the matching status code.
//! Internal errors are logged with full detail but only a generic message
//! reaches the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed request fields.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// No valid bearer token presented.
    #[error("unauthorized")]
    Unauthorized,

    /// Referenced chat does not exist or belongs to another owner.
    #[error("not found: {0}")]
    NotFound(String),

    /// Propagated from the SQLite store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unclassified internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<sqlx::Error>() {
            Ok(db) => ApiError::Database(db),
            Err(other) => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Non authentifié".to_string()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Database(e) => {
                error!(error = %e, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage failure".to_string())
            }
            ApiError::Internal(m) => {
                error!(error = %m, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
