//! The tunnel driver seam.
//!
//! The engine assembles a WireGuard configuration and hands it to a
//! [`TunnelDriver`]; the data plane itself (userspace TUN, SOCKS5/HTTP
//! proxying) lives behind this trait and is supplied by the embedding
//! application.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::wireguard::WgConfig;

/// A failure reported by the WireGuard driver.
#[derive(Debug, Clone, Error)]
#[error("tunnel driver failed: {0}")]
pub struct DriverError(pub String);

/// Runs the WireGuard data plane for one endpoint.
#[async_trait]
pub trait TunnelDriver: Send + Sync {
    /// Bring the tunnel up and serve until the token is cancelled.
    ///
    /// A quick error return means the endpoint is unusable and the engine
    /// should rotate to the next one.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when the tunnel cannot be established.
    async fn run(
        &self,
        token: CancellationToken,
        config: &WgConfig,
        proxy: &ProxyConfig,
    ) -> Result<(), DriverError>;
}
