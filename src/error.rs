//! Error taxonomy for login sessions.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = LoginError> = std::result::Result<T, E>;

/// Everything that can go wrong while driving a login session.
///
/// `NotFound` covers both unknown and expired ids. The two cases are
/// deliberately indistinguishable so callers cannot probe for ids that once
/// existed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("login session not found or expired")]
    NotFound,

    #[error("login session was already activated")]
    AlreadyActivated,

    #[error("login code has not been sent yet; open the bot first")]
    NotReady,

    #[error("invalid login code")]
    CodeMismatch,

    #[error("{0} is not configured")]
    ConfigurationMissing(&'static str),

    #[error("login session id already exists")]
    DuplicateId,

    #[error("session store failure: {0}")]
    Backend(String),

    #[error("message delivery failed: {0}")]
    Delivery(String),
}

impl LoginError {
    /// Stable identifier for the error, suitable for clients to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            LoginError::NotFound => "not_found",
            LoginError::AlreadyActivated => "already_activated",
            LoginError::NotReady => "not_ready",
            LoginError::CodeMismatch => "code_mismatch",
            LoginError::ConfigurationMissing(_) => "configuration_missing",
            LoginError::DuplicateId => "duplicate_id",
            LoginError::Backend(_) => "backend",
            LoginError::Delivery(_) => "delivery",
        }
    }

    /// Whether the caller may retry the same request against the same session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoginError::CodeMismatch | LoginError::NotReady)
    }

    fn status(&self) -> StatusCode {
        match self {
            LoginError::ConfigurationMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
            LoginError::Backend(_) | LoginError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Lifecycle outcomes are part of the normal flow and travel in the body.
            _ => StatusCode::OK,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        });

        (self.status(), Json(body)).into_response()
    }
}
