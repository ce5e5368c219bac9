//! Error types for the inklist directory service.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::validation::ValidationError;

/// Directory domain error. Every variant maps to exactly one HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Refresh/delete failure. The reason is shown to the caller verbatim;
    /// it may be an admin's kick reason.
    #[error("{0}")]
    Refresh(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    /// Malformed request without a single field to blame.
    #[error("{0}")]
    BadRequest(String),

    #[error("Too many requests. Wait {0} seconds.")]
    RateLimited(i64),

    // Infrastructure errors; details are logged, never sent to clients.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. }
            | Self::Refresh(_)
            | Self::Conflict(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON error body: `{"status": "error", "message": "..."}`.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal failures stay opaque to clients.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorBody {
            status: "error",
            message,
        });

        if matches!(self, Self::Unauthorized) {
            (
                status,
                [(
                    header::WWW_AUTHENTICATE,
                    r#"Basic realm="list server administration""#,
                )],
                body,
            )
                .into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            field: err.field,
            message: err.message,
        }
    }
}

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, ApiError>;
