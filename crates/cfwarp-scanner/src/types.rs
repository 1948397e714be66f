//! Shared scanner types.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnet::IpNet;

use crate::cache::EndpointCache;

/// A probed endpoint: address, measured round-trip time, and when the
/// measurement was taken. Immutable once enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpInfo {
    pub addr_port: SocketAddr,
    pub rtt: Duration,
    pub created_at: Instant,
}

/// Options for a scan run.
#[derive(Clone)]
pub struct ScannerOptions {
    pub use_ipv4: bool,
    pub use_ipv6: bool,
    pub cidr_list: Vec<IpNet>,
    pub warp_private_key: String,
    pub warp_peer_public_key: String,
    pub warp_preshared_key: String,
    pub ip_queue_size: usize,
    pub ip_queue_ttl: Duration,
    pub max_desirable_rtt: Duration,
    pub cache: Option<Arc<EndpointCache>>,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            use_ipv4: true,
            use_ipv6: true,
            cidr_list: cfwarp_api::network::scanner_prefixes(),
            warp_private_key: String::new(),
            warp_peer_public_key: String::new(),
            warp_preshared_key: String::new(),
            ip_queue_size: 8,
            ip_queue_ttl: Duration::from_secs(30),
            max_desirable_rtt: Duration::from_millis(400),
            cache: None,
        }
    }
}
