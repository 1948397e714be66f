//! Engine configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Scan parameters for the connection engine's discovery path.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub use_ipv4: bool,
    pub use_ipv6: bool,
    pub max_rtt: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            use_ipv4: true,
            use_ipv6: true,
            max_rtt: Duration::from_millis(1000),
        }
    }
}

/// Proxy bind addresses handed through to the tunnel driver.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub socks_addr: Option<SocketAddr>,
    pub http_addr: Option<SocketAddr>,
}

/// Configuration for one engine run.
#[derive(Debug, Clone)]
pub struct Config {
    pub socks_addr: Option<SocketAddr>,
    pub http_addr: Option<SocketAddr>,
    /// Endpoints to connect to, in order of preference.
    pub endpoints: Vec<String>,
    /// DNS server used inside the tunnel and for the bootstrap lookup.
    pub dns_addr: IpAddr,
    /// When set, scan for endpoints before connecting.
    pub scan: Option<ScanOptions>,
    /// Endpoints were supplied by the user: a connection failure is fatal
    /// instead of rotating.
    pub user_provided_endpoint: bool,
    /// Client data directory (identity files and endpoint cache).
    pub data_dir: PathBuf,
}
