use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::risk::Violation;

/// Error taxonomy for the decision runtime.
///
/// Validation, not-found, conflict, and policy errors propagate to the
/// caller unchanged. Recoverable upstream errors are retried locally by
/// the component that issued the call; once they reach this type they are
/// terminal for the request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("risk policy {policy_version} rejected trade: {}", codes(.violations))]
    PolicyViolation {
        policy_version: String,
        violations: Vec<Violation>,
    },

    #[error("{service} unavailable: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("permanent upstream error from {service}: {message}")]
    Permanent {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn codes(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    pub fn upstream(service: &'static str, msg: impl std::fmt::Display) -> Self {
        Error::Upstream {
            service,
            message: msg.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(..) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::PolicyViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Upstream { .. } | Error::Permanent { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            Error::PolicyViolation {
                policy_version,
                violations,
            } => json!({
                "error": self.to_string(),
                "policy_version": policy_version,
                "violations": violations,
            }),
            _ => json!({ "error": self.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        }
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => {
                Error::NotFound("row", "query returned no rows".into())
            }
            other => Error::Internal(other.into()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
