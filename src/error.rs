use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::job_store::StoreError;
use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Error type for HTTP handlers.
///
/// Implements [`IntoResponse`] producing `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed submission fields.
    #[error("{0}")]
    Validation(String),

    /// A submission referenced an input file the input store does not have.
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Output not found: {0}")]
    OutputNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::InputNotFound(_) => (StatusCode::NOT_FOUND, "INPUT_NOT_FOUND", self.to_string()),
            ApiError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND", self.to_string()),
            ApiError::OutputNotFound(_) => {
                (StatusCode::NOT_FOUND, "OUTPUT_NOT_FOUND", self.to_string())
            }
            ApiError::Queue(QueueError::Full(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_FULL",
                "Generation queue is full, retry later".to_string(),
            ),
            ApiError::Storage(StorageError::InvalidKey(key)) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Invalid file name: {key:?}"),
            ),
            ApiError::Store(_) | ApiError::Queue(_) | ApiError::Storage(_) => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
