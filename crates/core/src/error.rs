//! Unified error types for trawl.
//!
//! Every variant carries the HTTP status it is reported with at the
//! service boundary.

use crate::storage::StoreError;

/// Unified error type for the fetch pipeline.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Malformed request or empty URL.
    #[error("BAD_REQUEST: {0}")]
    BadRequest(String),

    /// Access disallowed by the host's robots.txt.
    #[error("FORBIDDEN_BY_ROBOTS: {0}: forbidden by robots.txt")]
    ForbiddenByRobots(String),

    /// The origin refused the request (HTTP 403).
    #[error("FORBIDDEN: {0}")]
    Forbidden(String),

    /// The resource does not exist (HTTP 404), cached or fresh.
    #[error("NOT_FOUND: {0}: resource not found")]
    NotFound(String),

    /// The rendering service exceeded its render timeout.
    #[error("GATEWAY_TIMEOUT: {0}")]
    GatewayTimeout(String),

    /// A local deadline elapsed before the backend answered.
    #[error("TIMEOUT: {0}")]
    Timeout(String),

    /// Storage backend failure that could not be suppressed.
    #[error("STORAGE_ERROR: {0}")]
    Storage(String),

    /// Anything else.
    #[error("ERROR: {0}")]
    Error(String),
}

impl Error {
    /// HTTP status code this error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::ForbiddenByRobots(_) | Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::GatewayTimeout(_) | Error::Timeout(_) => 504,
            Error::Storage(_) | Error::Error(_) => 500,
        }
    }

    /// Short machine-readable kind, used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::ForbiddenByRobots(_) => "ForbiddenByRobots",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::GatewayTimeout(_) => "GatewayTimeout",
            Error::Timeout(_) => "Timeout",
            Error::Storage(_) => "Storage",
            Error::Error(_) => "Error",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::GatewayTimeout(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Error::NotFound(key),
            other => Error::Storage(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Error(format!("json: {err}"))
    }
}
