// ABOUTME: Error taxonomy for backend calls.
// ABOUTME: Classifies failures so workers can decide between reauth-retry and surfacing.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single backend operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend rejected our credentials/session (HTTP 401/403).
    #[error("session expired: {0}")]
    SessionExpired(String),

    /// The call did not finish before its deadline.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Anything else: transport failures, 5xx, unparseable responses.
    #[error("{0}")]
    Other(String),
}

/// Wire-level classification carried in failure envelopes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    SessionExpired,
    BackendTimeout,
    BackendOther,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::SessionExpired => "session_expired",
            ErrorClass::BackendTimeout => "backend_timeout",
            ErrorClass::BackendOther => "backend_other",
        }
    }
}

impl BackendError {
    pub fn other(message: impl Into<String>) -> Self {
        BackendError::Other(message.into())
    }

    /// True for the authorization-failure signature that warrants a session refresh
    pub fn is_session_expired(&self) -> bool {
        matches!(self, BackendError::SessionExpired(_))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::SessionExpired(_) => ErrorClass::SessionExpired,
            BackendError::Timeout(_) => ErrorClass::BackendTimeout,
            BackendError::Other(_) => ErrorClass::BackendOther,
        }
    }

    /// Map an HTTP status from the backend onto the taxonomy
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };
        match status {
            401 | 403 => BackendError::SessionExpired(detail),
            408 | 504 => BackendError::Other(format!("upstream timeout ({})", detail)),
            _ => BackendError::Other(detail),
        }
    }
}
