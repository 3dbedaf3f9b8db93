//! Daemon-wide error type with the stable kind taxonomy used at API
//! boundaries. Engine and upstream detail strings are logged, never echoed
//! to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Subkinds of invalid input, reported inside the `kind` field as
/// `invalid-input/<subkind>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidInputKind {
    ResourceLimit,
    EnvVarFormat,
    McpConfig,
    Frontmatter,
    Threshold,
    PathTraversal,
    Other,
}

impl InvalidInputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidInputKind::ResourceLimit => "resource-limit",
            InvalidInputKind::EnvVarFormat => "env-var-format",
            InvalidInputKind::McpConfig => "mcp-config",
            InvalidInputKind::Frontmatter => "frontmatter",
            InvalidInputKind::Threshold => "threshold",
            InvalidInputKind::PathTraversal => "path-traversal",
            InvalidInputKind::Other => "other",
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input ({}): {message}", kind.as_str())]
    InvalidInput {
        kind: InvalidInputKind,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid(kind: InvalidInputKind, message: impl Into<String>) -> Self {
        ApiError::InvalidInput {
            kind,
            message: message.into(),
        }
    }

    /// Stable kind name carried in error payloads.
    pub fn kind(&self) -> String {
        match self {
            ApiError::NotFound(_) => "not-found".into(),
            ApiError::AlreadyExists(_) => "already-exists".into(),
            ApiError::InvalidInput { kind, .. } => {
                format!("invalid-input/{}", kind.as_str())
            }
            ApiError::Unauthorized(_) => "unauthorized".into(),
            ApiError::PreconditionFailed(_) => "precondition-failed".into(),
            ApiError::UpstreamUnavailable(_) => "upstream-unavailable".into(),
            ApiError::Timeout(_) => "timeout".into(),
            ApiError::Cancelled(_) => "cancelled".into(),
            ApiError::Internal(_) => "internal".into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Cancelled(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bollard::errors::Error> for ApiError {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => ApiError::NotFound("engine resource not found".into()),
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message,
            } => ApiError::AlreadyExists(message),
            other => {
                error!("engine error: {}", other);
                ApiError::UpstreamUnavailable("container engine request failed".into())
            }
        }
    }
}

impl From<crate::database::DatabaseError> for ApiError {
    fn from(e: crate::database::DatabaseError) -> Self {
        use crate::database::DatabaseError;
        match e {
            DatabaseError::NotFound(message) => ApiError::NotFound(message),
            DatabaseError::InvalidTransition(message) => {
                ApiError::invalid(InvalidInputKind::Other, message)
            }
            other => {
                error!("database error: {}", other);
                ApiError::Internal("database operation failed".into())
            }
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => ApiError::NotFound("record not found".into()),
            other => {
                error!("database error: {}", other);
                ApiError::Internal("database operation failed".into())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": true,
            "kind": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ApiError::NotFound("x".into()).kind(), "not-found");
        assert_eq!(
            ApiError::invalid(InvalidInputKind::Threshold, "bad").kind(),
            "invalid-input/threshold"
        );
        assert_eq!(
            ApiError::PreconditionFailed("not ready".into()).kind(),
            "precondition-failed"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::invalid(InvalidInputKind::Threshold, "x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::PreconditionFailed("x".into()).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            ApiError::AlreadyExists("x".into()).status(),
            StatusCode::CONFLICT
        );
    }
}
