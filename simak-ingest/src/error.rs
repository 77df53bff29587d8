//! Error types for simak-ingest
//!
//! File-level and job-level failures propagate to the import log. Row-level
//! problems are `RowIssue` values and group-level failures are absorbed by the
//! persistence service; neither reaches the caller as an error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Uploaded file could not be read as a transcript. Fatal to the whole job.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unsupported file format: expected an Excel/ODS workbook or CSV text")]
    UnsupportedFormat,

    /// Not a workbook, and the bytes are not UTF-8 text either. Legacy
    /// single-byte CSV exports (Windows-1252, Latin-1) land here.
    #[error(
        "Unsupported file format: text is not valid UTF-8 (invalid byte at offset {offset}); \
         save the CSV as UTF-8 or upload an Excel workbook"
    )]
    NotUtf8 { offset: usize },

    #[error("Failed to read workbook: {0}")]
    Workbook(String),

    #[error("Failed to read CSV: {0}")]
    Csv(String),

    #[error("No sheets found in file")]
    NoSheets,

    #[error("Parsed sheet is empty")]
    EmptySheet,
}

/// Identity codec failure. Decryption fails closed with one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed identity ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Identity ciphertext failed authentication")]
    AuthenticationFailed,

    #[error("Identity encryption failed")]
    EncryptionFailed,

    #[error("System random source failed")]
    RandomSource,
}

/// Failure of one student's unit of work. Other students are unaffected.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("Decrypt error: {0}")]
    Decrypt(#[from] CodecError),

    #[error("Credential bootstrap failed: {0}")]
    Credential(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] simak_common::Error),
}

impl GroupError {
    /// True when the database itself was unavailable, as opposed to
    /// rejecting this group's data
    pub fn is_transient(&self) -> bool {
        match self {
            GroupError::Persistence(simak_common::Error::Database(err)) => match err {
                sqlx::Error::Database(db_err) => {
                    matches!(db_err.kind(), sqlx::error::ErrorKind::Other)
                }
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<sqlx::Error> for GroupError {
    fn from(err: sqlx::Error) -> Self {
        GroupError::Persistence(simak_common::Error::Database(err))
    }
}

/// Job-level failure, reported as FAILED on the import log once terminal
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Database error: {0}")]
    Database(#[from] simak_common::Error),

    #[error("No student records could be saved ({failed} student groups failed)")]
    NoGroupPersisted { failed: usize },

    #[error("Job task failed: {0}")]
    Task(String),
}

impl JobError {
    /// Transient failures are redelivered by the queue; the rest are final
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Database(_) | JobError::Task(_) => true,
            JobError::Payload(_) | JobError::Parse(_) | JobError::NoGroupPersisted { .. } => false,
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Database(simak_common::Error::Database(err))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing caller identity (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller role not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// simak-common error
    #[error("Common error: {0}")]
    Common(#[from] simak_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(simak_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
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
    fn test_retry_classification() {
        assert!(JobError::Task("panicked".to_string()).is_retryable());
        assert!(JobError::Database(simak_common::Error::Internal("locked".to_string())).is_retryable());
        assert!(!JobError::Parse(ParseError::EmptySheet).is_retryable());
        assert!(!JobError::Payload("bad base64".to_string()).is_retryable());
        assert!(!JobError::NoGroupPersisted { failed: 2 }.is_retryable());
    }

    #[test]
    fn test_group_error_transient_classification() {
        assert!(GroupError::from(sqlx::Error::PoolClosed).is_transient());
        assert!(GroupError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!GroupError::from(sqlx::Error::RowNotFound).is_transient());
        assert!(!GroupError::Decrypt(CodecError::AuthenticationFailed).is_transient());
        assert!(!GroupError::Persistence(simak_common::Error::Internal("login already linked".into()))
            .is_transient());
    }

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Common(simak_common::Error::NotFound("log".into()))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
    }
}
