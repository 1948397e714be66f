//! Error types for the registration API and identity storage.

use std::borrow::Cow;
use thiserror::Error;

/// Errors from the registration API client and identity storage.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP transport failure
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the API
    #[error("API request failed with status {0}")]
    Status(reqwest::StatusCode),

    /// Identity is missing or structurally invalid
    #[error("identity error: {0}")]
    Identity(Cow<'static, str>),

    /// Filesystem failure reading or writing identity files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ApiError {
    /// Create an identity error with static context (zero allocation)
    #[must_use]
    pub const fn identity(context: &'static str) -> Self {
        ApiError::Identity(Cow::Borrowed(context))
    }
}

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
