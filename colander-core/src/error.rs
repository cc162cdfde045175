use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed remote call.
///
/// Only `Transient` failures are retried; everything else is surfaced to the
/// caller immediately. `Auth` is fatal for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network error, timeout, or HTTP 408/425/429/500/502/503/504.
    Transient,
    /// HTTP 409 (duplicate name, alias already exists).
    Conflict,
    /// HTTP 404.
    NotFound,
    /// HTTP 400/422.
    Validation,
    /// HTTP 401/403. Halts the session.
    Auth,
    /// Anything else that slipped through.
    Other,
}

impl ErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Transient)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Other => "other",
        }
    }
}

/// Classify an HTTP status code.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 425 | 429 | 500 | 502 | 503 | 504 => ErrorKind::Transient,
        409 => ErrorKind::Conflict,
        404 => ErrorKind::NotFound,
        400 | 422 => ErrorKind::Validation,
        401 | 403 => ErrorKind::Auth,
        _ => ErrorKind::Other,
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid response from server: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Map this error into the retry/surface taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorKind::Transient,
            ApiError::Status { status, .. } => classify_status(*status),
            ApiError::InvalidResponse(_) => ErrorKind::Other,
        }
    }

    /// True when the whole session should halt rather than continue.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Auth
    }
}

/// Why a session file could not be loaded.
///
/// Callers offer "start fresh" for all three, but logs must tell them apart.
#[derive(Error, Debug)]
pub enum SessionLoadError {
    #[error("no session file found")]
    Missing,

    #[error("session file is corrupted: {0}")]
    Corrupted(String),

    #[error("session schema {found} is not supported (expected {expected})")]
    IncompatibleSchema { found: String, expected: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses_match_retry_table() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert_eq!(classify_status(status), ErrorKind::Transient, "{status}");
        }
    }

    #[test]
    fn permanent_statuses_are_not_retried() {
        assert_eq!(classify_status(409), ErrorKind::Conflict);
        assert_eq!(classify_status(404), ErrorKind::NotFound);
        assert_eq!(classify_status(400), ErrorKind::Validation);
        assert_eq!(classify_status(422), ErrorKind::Validation);
        assert_eq!(classify_status(401), ErrorKind::Auth);
        assert_eq!(classify_status(403), ErrorKind::Auth);
        assert_eq!(classify_status(501), ErrorKind::Other);
        assert_eq!(classify_status(418), ErrorKind::Other);
    }

    #[test]
    fn network_errors_are_transient() {
        let err = ApiError::Network("connection refused".to_string());
        assert!(err.kind().is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn auth_errors_are_fatal() {
        let err = ApiError::Status {
            operation: "list recipes",
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert!(err.is_fatal());
    }
}
