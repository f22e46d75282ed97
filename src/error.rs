//! Error taxonomy shared across the whole application
//!
//! One central enum keeps the HTTP mapping in a single place: handlers
//! return `Result<_, AppError>` and axum renders the JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad user input, no state change.
    #[error("{0}")]
    Validation(String),

    /// Unknown position id.
    #[error("{0}")]
    NotFound(String),

    /// Invalid state transition, e.g. closing an already-closed position.
    #[error("{0}")]
    Conflict(String),

    /// Exchange REST/WebSocket failure surfaced to the caller.
    #[error("upstream exchange error: {0}")]
    Upstream(String),

    /// Database write/read failed; the operation is abandoned.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Programmer error or broken invariant.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg, "VALIDATION"),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, "CONFLICT"),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg, "UPSTREAM"),
            AppError::Storage(e) => {
                // Client is shielded from database internals.
                tracing::error!(error = %e, "storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage error".to_string(),
                    "STORAGE",
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    "INTERNAL",
                )
            }
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AppError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (AppError::NotFound("missing".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("closed".into()), StatusCode::CONFLICT),
            (AppError::Upstream("down".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
