//! Error taxonomy for probes, scans and the endpoint cache.

use std::borrow::Cow;
use thiserror::Error;

/// Errors from a single WARP probe attempt.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Hostname resolution failed
    #[error("DNS resolution failed: {0}")]
    Dns(Cow<'static, str>),

    /// UDP socket creation or connect failed
    #[error("dial failed: {0}")]
    Dial(#[source] std::io::Error),

    /// Sending a datagram failed
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Receiving the response failed
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    /// No response within the read deadline
    #[error("handshake response read timed out")]
    ReadTimeout,

    /// Response failed structural validation
    #[error("malformed handshake response: {0}")]
    MalformedResponse(Cow<'static, str>),

    /// Noise state failure or key material problem
    #[error("crypto error: {0}")]
    Crypto(Cow<'static, str>),

    /// The OS random source failed
    #[error("random source failed: {0}")]
    Random(Cow<'static, str>),

    /// The probe was cancelled
    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Create a malformed-response error with static context
    #[must_use]
    pub const fn malformed(context: &'static str) -> Self {
        ProbeError::MalformedResponse(Cow::Borrowed(context))
    }

    /// Create a crypto error with static context
    #[must_use]
    pub const fn crypto(context: &'static str) -> Self {
        ProbeError::Crypto(Cow::Borrowed(context))
    }
}

impl From<snow::Error> for ProbeError {
    fn from(err: snow::Error) -> Self {
        ProbeError::Crypto(Cow::Owned(err.to_string()))
    }
}

impl From<base64::DecodeError> for ProbeError {
    fn from(err: base64::DecodeError) -> Self {
        ProbeError::Crypto(Cow::Owned(format!("invalid base64 key: {err}")))
    }
}

impl From<getrandom::Error> for ProbeError {
    fn from(err: getrandom::Error) -> Self {
        ProbeError::Random(Cow::Owned(err.to_string()))
    }
}

/// Errors from a whole scan run.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Scanner misconfiguration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// The scan deadline elapsed without enough results
    #[error("scan timed out")]
    Timeout,

    /// The scan was cancelled
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Create an invalid-config error with static context
    #[must_use]
    pub const fn invalid_config(context: &'static str) -> Self {
        ScanError::InvalidConfig(Cow::Borrowed(context))
    }
}

/// Errors from the endpoint cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Every cached endpoint is gone or failed out
    #[error("no available endpoints in the cache")]
    NoAvailableEndpoints,

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
