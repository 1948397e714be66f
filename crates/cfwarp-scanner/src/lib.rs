//! # cfwarp-scanner
//!
//! Endpoint discovery for Cloudflare WARP: walks the known WARP CIDR
//! ranges, performs real WireGuard handshake probes against every
//! candidate, ranks responders by round-trip time and remembers them in a
//! persistent, failure-aware cache.
//!
//! ```no_run
//! use cfwarp_scanner::IpScanner;
//!
//! # async fn example() -> Result<(), cfwarp_scanner::ScanError> {
//! let scanner = IpScanner::new()
//!     .with_warp_private_key("…".into())
//!     .with_warp_peer_public_key("…".into())
//!     .with_use_ipv6(false);
//!
//! scanner.run().await?;
//! for info in scanner.available_ips() {
//!     println!("{} {:?}", info.addr_port, info.rtt);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod cache;
pub mod engine;
pub mod error;
pub mod generator;
pub mod probe;
pub mod queue;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use ipnet::IpNet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use cache::{Endpoint, EndpointCache, MAX_FAILURES};
pub use error::{CacheError, ProbeError, ScanError};
pub use probe::{WarpKeys, WarpProbe};
pub use types::{IpInfo, ScannerOptions};

use engine::ScanEngine;
use queue::IpQueue;

/// Scanner facade: owns the options, the cancellation token and the
/// priority queue; [`IpScanner::run`] drives the engine until stopped.
pub struct IpScanner {
    options: ScannerOptions,
    token: CancellationToken,
    ip_queue: Arc<IpQueue>,
}

impl IpScanner {
    /// A scanner with default options: both address families, the
    /// built-in WARP prefixes, a queue of 8 with a 30-second TTL and a
    /// 400 ms desirability threshold.
    #[must_use]
    pub fn new() -> Self {
        let options = ScannerOptions::default();
        let ip_queue = Arc::new(IpQueue::new(&options));
        Self {
            options,
            token: CancellationToken::new(),
            ip_queue,
        }
    }

    #[must_use]
    pub fn with_use_ipv4(mut self, use_ipv4: bool) -> Self {
        self.options.use_ipv4 = use_ipv4;
        self
    }

    #[must_use]
    pub fn with_use_ipv6(mut self, use_ipv6: bool) -> Self {
        self.options.use_ipv6 = use_ipv6;
        self
    }

    #[must_use]
    pub fn with_cidr_list(mut self, cidr_list: Vec<IpNet>) -> Self {
        self.options.cidr_list = cidr_list;
        self
    }

    #[must_use]
    pub fn with_ip_queue_size(mut self, size: usize) -> Self {
        self.options.ip_queue_size = size;
        self.rebuild_queue()
    }

    #[must_use]
    pub fn with_ip_queue_ttl(mut self, ttl: Duration) -> Self {
        self.options.ip_queue_ttl = ttl;
        self.rebuild_queue()
    }

    #[must_use]
    pub fn with_max_desirable_rtt(mut self, threshold: Duration) -> Self {
        self.options.max_desirable_rtt = threshold;
        self.rebuild_queue()
    }

    #[must_use]
    pub fn with_warp_private_key(mut self, private_key: String) -> Self {
        self.options.warp_private_key = private_key;
        self
    }

    #[must_use]
    pub fn with_warp_peer_public_key(mut self, peer_public_key: String) -> Self {
        self.options.warp_peer_public_key = peer_public_key;
        self
    }

    #[must_use]
    pub fn with_warp_preshared_key(mut self, preshared_key: String) -> Self {
        self.options.warp_preshared_key = preshared_key;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<EndpointCache>) -> Self {
        self.options.cache = Some(cache);
        self
    }

    /// Derive the scanner's cancellation from a parent token.
    #[must_use]
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child_token();
        self
    }

    // Queue parameters are baked in at construction; rebuild when a
    // builder call changes one before run().
    fn rebuild_queue(mut self) -> Self {
        self.ip_queue = Arc::new(IpQueue::new(&self.options));
        self
    }

    /// Run the scan until [`IpScanner::stop`] or parent cancellation.
    /// Saves the attached cache on the way out.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] when both address families
    /// are disabled or no prefix survives filtering.
    pub async fn run(&self) -> Result<(), ScanError> {
        if !self.options.use_ipv4 && !self.options.use_ipv6 {
            return Err(ScanError::invalid_config(
                "both IPv4 and IPv6 scanning are disabled; enable at least one",
            ));
        }

        let mut engine = ScanEngine::new(
            self.token.clone(),
            Arc::new(self.options.clone()),
            self.ip_queue.clone(),
        )?;
        engine.run().await;

        if let Some(cache) = &self.options.cache {
            if let Err(err) = cache.save() {
                warn!(error = %err, "Failed to save IP scan results to cache file");
            }
        }

        Ok(())
    }

    /// Stop a running scan.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Snapshot of the discovered endpoints, best (lowest RTT) first.
    #[must_use]
    pub fn available_ips(&self) -> Vec<IpInfo> {
        self.ip_queue.available_ips(false)
    }
}

impl Default for IpScanner {
    fn default() -> Self {
        Self::new()
    }
}
