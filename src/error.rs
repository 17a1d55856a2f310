//! Application error types and HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),

    #[error("{0}")]
    Upload(#[from] crate::upload::UploadError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication credentials were not provided.")]
    Unauthorized,

    #[error("You do not have permission to perform this action.")]
    Forbidden,

    /// The authorization checker answered with a status that is neither a
    /// success nor an explicit denial. Surfaced as a generic server error.
    #[error("authorization check failed with status {0}")]
    AuthSubsystem(StatusCode),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Requested file does not exist".to_string(),
            ),
            AppError::Io(e) => {
                tracing::error!(error = %e, "io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    "A filesystem error occurred".to_string(),
                )
            }
            AppError::Http(e) => {
                tracing::error!(error = %e, "failed to build response");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Failed to build response".to_string(),
                )
            }
            AppError::Upload(crate::upload::UploadError::MalformedMetadata) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                self.to_string(),
            ),
            AppError::Upload(crate::upload::UploadError::Io(e)) => {
                tracing::error!(error = %e, "upload io error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    "A filesystem error occurred".to_string(),
                )
            }
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", what.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "not_authenticated",
                self.to_string(),
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "permission_denied", self.to_string()),
            AppError::AuthSubsystem(code) => {
                tracing::error!(status = %code, "authorization checker returned unexpected status");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
