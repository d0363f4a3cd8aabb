/// Unified error types for Dropkeep
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the drop service
#[derive(Error, Debug)]
pub enum DropError {
    /// Drop id absent, deleted, expired or exhausted.
    /// Callers never learn which of these it was.
    #[error("Drop not found")]
    NotFound,

    /// Missing or wrong admin password
    #[error("Not authorized")]
    Unauthorized,

    /// Malformed TTL, oversized payload, bad form fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Blob storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Id collision on create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A storage operation did not finish within the configured deadline
    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DropError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DropError::NotFound)
    }

    /// True for the persistence-failure class (`StorageError` in the HTTP taxonomy)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            DropError::Storage(_)
                | DropError::Database(_)
                | DropError::Io(_)
                | DropError::Timeout(_)
                | DropError::Conflict(_)
        )
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert DropError to HTTP response
impl IntoResponse for DropError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            DropError::NotFound => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            DropError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized",
                "Invalid or missing password".to_string(),
            ),
            DropError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "InvalidRequest", self.to_string())
            }
            e if e.is_storage() => {
                // Don't leak storage details
                tracing::error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "StorageError",
                    "Storage error".to_string(),
                )
            }
            _ => {
                tracing::error!("Internal error: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for drop operations
pub type DropResult<T> = Result<T, DropError>;
