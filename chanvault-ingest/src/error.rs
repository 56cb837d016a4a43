//! Error types for chanvault-ingest

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Ingestion pipeline error taxonomy
///
/// Collaborator-level errors never abort the pipeline as a whole: each
/// message is isolated, and a failure for one message must not block
/// processing of subsequent messages.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Message carries no video/image payload; dropped, counted as ignored
    #[error("Unsupported media kind")]
    UnsupportedMediaKind,

    /// Corrupt or partial payload; counted as failed, not retried
    #[error("Unreadable content: {0}")]
    UnreadableContent(String),

    /// Duplicate index backing store unreachable; transient, retried with
    /// bounded backoff before the message is failed
    #[error("Duplicate index unavailable: {0}")]
    IndexUnavailable(String),

    /// Policy rejection; counted separately from duplicates and failures
    #[error("Payload too large: {size_bytes} bytes (max {max_bytes})")]
    PayloadTooLarge { size_bytes: u64, max_bytes: u64 },

    /// Durable write failed; retried a fixed number of times, then the
    /// reservation is released and the message is failed
    #[error("Storage write error: {0}")]
    StorageWrite(String),

    /// Shared error types (database, IO, config)
    #[error(transparent)]
    Common(#[from] chanvault_common::Error),
}

impl IngestError {
    /// Stable reason code surfaced to the command layer.
    /// Raw internal error details never leave the service.
    pub fn reason_code(&self) -> &'static str {
        match self {
            IngestError::UnsupportedMediaKind => "UNSUPPORTED_MEDIA_KIND",
            IngestError::UnreadableContent(_) => "UNREADABLE_CONTENT",
            IngestError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            IngestError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            IngestError::StorageWrite(_) => "STORAGE_WRITE_ERROR",
            IngestError::Common(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient errors are worth retrying; policy and corruption errors
    /// are not
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::IndexUnavailable(_)
                | IngestError::StorageWrite(_)
                | IngestError::Common(chanvault_common::Error::Database(_))
        )
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Common(chanvault_common::Error::Database(err))
    }
}

/// Result type for pipeline internals
pub type IngestResult<T> = Result<T, IngestError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// chanvault-common error
    #[error("Common error: {0}")]
    Common(#[from] chanvault_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(chanvault_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(chanvault_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            IngestError::UnreadableContent("x".into()).reason_code(),
            "UNREADABLE_CONTENT"
        );
        assert_eq!(
            IngestError::PayloadTooLarge { size_bytes: 2, max_bytes: 1 }.reason_code(),
            "PAYLOAD_TOO_LARGE"
        );
        assert_eq!(
            IngestError::IndexUnavailable("down".into()).reason_code(),
            "INDEX_UNAVAILABLE"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(IngestError::IndexUnavailable("down".into()).is_transient());
        assert!(IngestError::StorageWrite("disk".into()).is_transient());
        assert!(!IngestError::UnreadableContent("bad".into()).is_transient());
        assert!(!IngestError::PayloadTooLarge { size_bytes: 2, max_bytes: 1 }.is_transient());
    }
}
