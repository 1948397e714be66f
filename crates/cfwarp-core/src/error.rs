//! Error types for the connection engine.

use std::borrow::Cow;
use thiserror::Error;

use crate::tunnel::DriverError;

/// Errors from the connection engine and its collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The endpoint list, the cache and the scanner all came up empty
    #[error("no endpoint available")]
    NoEndpointAvailable,

    /// Endpoint scanning failed
    #[error("scan failed: {0}")]
    Scan(#[from] cfwarp_scanner::ScanError),

    /// The WireGuard driver reported a failure
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Registration API or identity failure
    #[error("identity error: {0}")]
    Api(#[from] cfwarp_api::ApiError),

    /// Bootstrap DNS lookup failed
    #[error("DNS resolution failed: {0}")]
    Dns(Cow<'static, str>),

    /// Engine misconfiguration or unusable identity
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// The engine run was cancelled
    #[error("engine cancelled")]
    Cancelled,
}

impl EngineError {
    /// Create an invalid-config error with static context
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        EngineError::InvalidConfig(Cow::Borrowed(context))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
