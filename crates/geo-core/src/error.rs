//! Error types for analysis operations.
//!
//! This module defines [`AnalysisError`] which covers all error cases that can occur
//! when building, submitting, or caching remote analysis requests.

use thiserror::Error;

/// Errors that can occur during analysis operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by the remote service.
    #[error("Rate limited by {service}: retry after {retry_after:?}")]
    RateLimited {
        /// The service that rate limited the request.
        service: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// The remote service rejected or failed to evaluate a request.
    #[error("Earth Engine error: {0}")]
    Upstream(String),

    /// The authentication handshake with the remote service failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A named remote asset or region does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error parsing a response from the remote service.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error interacting with the cache.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl AnalysisError {
    /// Builds an [`AnalysisError::InvalidParameter`] from anything printable.
    pub fn invalid(msg: impl ToString) -> Self {
        Self::InvalidParameter(msg.to_string())
    }

    /// Builds an [`AnalysisError::Upstream`] from anything printable.
    pub fn upstream(msg: impl ToString) -> Self {
        Self::Upstream(msg.to_string())
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

/// Result type alias using [`AnalysisError`].
pub type Result<T> = std::result::Result<T, AnalysisError>;
