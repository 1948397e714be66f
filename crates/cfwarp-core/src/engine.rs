//! The connection engine: selects endpoints and keeps the tunnel up.
//!
//! Selection order: an explicit scan, then user-supplied endpoints, then
//! the endpoint cache, then a /24 derived from resolving the well-known
//! WARP hostname; when even DNS fails, scan mode is switched on. The
//! engine then walks the endpoint list, handing each candidate to the
//! tunnel driver and rotating on failure.

use std::sync::Arc;

use ipnet::IpNet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cfwarp_api::Identity;
use cfwarp_scanner::generator::IpRange;
use cfwarp_scanner::EndpointCache;

use crate::config::{Config, ProxyConfig, ScanOptions};
use crate::error::EngineError;
use crate::resolver;
use crate::scan::{run_scan, DEFAULT_SCAN_TIMEOUT};
use crate::tunnel::TunnelDriver;
use crate::wireguard::{generate_wireguard_config, SCAN_KEEPALIVE};

/// Hostname resolved to derive bootstrap endpoints when the cache is
/// empty.
const BOOTSTRAP_HOST: &str = "engage.cloudflareclient.com";

/// The WARP connection engine.
pub struct Engine {
    token: CancellationToken,
    opts: Config,
    identity: Identity,
    cache: Arc<EndpointCache>,
    driver: Arc<dyn TunnelDriver>,
}

impl Engine {
    /// Build an engine for one run. The identity must already exist; use
    /// the registration flow to create one.
    #[must_use]
    pub fn new(
        token: CancellationToken,
        opts: Config,
        identity: Identity,
        cache: Arc<EndpointCache>,
        driver: Arc<dyn TunnelDriver>,
    ) -> Self {
        Self {
            token,
            opts,
            identity,
            cache,
            driver,
        }
    }

    /// Run until the tunnel comes up and is later cancelled, or until no
    /// endpoint works.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoEndpointAvailable`] when selection comes
    /// up empty, the driver's error when a user-provided endpoint fails,
    /// and scan errors from the discovery path.
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut scan_opts = self.opts.scan.clone();
        let mut endpoints = self.opts.endpoints.clone();

        if scan_opts.is_none() && endpoints.is_empty() && !self.opts.user_provided_endpoint {
            match self.cache.get_random_endpoints(1) {
                Ok(cached) => {
                    info!(endpoint = %cached[0], "Using random endpoint from cache");
                    endpoints = cached;
                }
                Err(_) => match self.bootstrap_endpoints().await {
                    Ok(derived) => endpoints = derived,
                    Err(err) => {
                        warn!(
                            error = %err,
                            "No cached endpoint and bootstrap resolution failed; enabling scanner mode to discover new endpoints"
                        );
                        scan_opts = Some(ScanOptions::default());
                    }
                },
            }
        }

        let mut scanned = false;
        if let Some(scan) = &scan_opts {
            endpoints = self.scan_endpoints(scan).await?;
            scanned = true;
        }

        loop {
            if self.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            if endpoints.is_empty() && !self.opts.user_provided_endpoint {
                if let Ok(cached) = self.cache.get_random_endpoints(1) {
                    info!(endpoints = ?cached, "Using new random endpoints from cache");
                    endpoints = cached;
                }
            }

            if endpoints.is_empty() {
                return Err(EngineError::NoEndpointAvailable);
            }

            let endpoint = endpoints[0].clone();
            info!(%endpoint, "Connecting to WARP endpoint");

            match self.run_tunnel(&endpoint, scanned).await {
                Ok(()) => {
                    self.cache.record_success(&endpoint);
                    if let Err(err) = self.cache.save() {
                        warn!(error = %err, "Failed to save endpoint cache");
                    }
                    return Ok(());
                }
                Err(err) => {
                    error!(error = %err, %endpoint, "WARP connection failed");
                    self.cache.record_failure(&endpoint);
                    endpoints.remove(0);
                    if self.opts.user_provided_endpoint {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Stop the engine; the driver's child token is cancelled with it.
    pub fn stop(&self) {
        self.token.cancel();
    }

    async fn scan_endpoints(&self, scan: &ScanOptions) -> Result<Vec<String>, EngineError> {
        let results = run_scan(
            &self.token,
            scan,
            &self.identity,
            cfwarp_api::network::scanner_prefixes(),
            self.cache.clone(),
            DEFAULT_SCAN_TIMEOUT,
        )
        .await?;

        info!(found = results.len(), "Scan successful");
        Ok(results
            .iter()
            .map(|info| info.addr_port.to_string())
            .collect())
    }

    /// Resolve the well-known WARP hostname and take the first two
    /// addresses of its /24 at the two primary data-plane ports.
    async fn bootstrap_endpoints(&self) -> Result<Vec<String>, EngineError> {
        let addr = resolver::resolve_ipv4(BOOTSTRAP_HOST, self.opts.dns_addr).await?;

        let prefix = ipnet::Ipv4Net::new(addr, 24)
            .map_err(|_| EngineError::invalid_config("invalid bootstrap prefix"))?
            .trunc();
        let addrs = IpRange::new(IpNet::V4(prefix)).get_all();

        match (addrs.first(), addrs.get(1)) {
            (Some(first), Some(second)) => {
                Ok(vec![format!("{first}:2408"), format!("{second}:500")])
            }
            _ => Err(EngineError::invalid_config("bootstrap prefix too small")),
        }
    }

    async fn run_tunnel(&self, endpoint: &str, scanned: bool) -> Result<(), EngineError> {
        let mut config = generate_wireguard_config(&self.identity)?;

        config.interface.dns = vec![self.opts.dns_addr];
        for peer in &mut config.peers {
            peer.endpoint = endpoint.to_string();
            if scanned {
                peer.keepalive = SCAN_KEEPALIVE;
            }
        }

        let proxy = ProxyConfig {
            socks_addr: self.opts.socks_addr,
            http_addr: self.opts.http_addr,
        };
        if let Some(addr) = proxy.socks_addr {
            info!(%addr, "Serving Socks5 proxy");
        }
        if let Some(addr) = proxy.http_addr {
            info!(%addr, "Serving HTTP proxy");
        }

        self.driver
            .run(self.token.child_token(), &config, &proxy)
            .await
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::DriverError;
    use crate::wireguard::WgConfig;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use cfwarp_api::model::{
        IdentityConfig, IdentityConfigInterfaceAddresses, IdentityConfigPeer,
        IdentityConfigPeerEndpoint,
    };
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    fn test_identity() -> Identity {
        Identity {
            private_key: BASE64.encode([1u8; 32]),
            config: IdentityConfig {
                peers: vec![IdentityConfigPeer {
                    public_key: BASE64.encode([2u8; 32]),
                    endpoint: IdentityConfigPeerEndpoint {
                        host: "engage.cloudflareclient.com:2408".into(),
                        ..Default::default()
                    },
                }],
                interface: cfwarp_api::model::IdentityConfigInterface {
                    addresses: IdentityConfigInterfaceAddresses {
                        v4: "172.16.0.2".into(),
                        v6: "2606:4700:110:8949::2".into(),
                    },
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_config(data_dir: &std::path::Path, endpoints: Vec<String>) -> Config {
        Config {
            socks_addr: None,
            http_addr: None,
            endpoints,
            dns_addr: "1.1.1.1".parse().unwrap(),
            scan: None,
            user_provided_endpoint: false,
            data_dir: data_dir.to_path_buf(),
        }
    }

    /// Driver that fails for a scripted endpoint set and records every
    /// config it sees.
    struct ScriptedDriver {
        failing: HashSet<String>,
        seen: Mutex<Vec<WgConfig>>,
    }

    impl ScriptedDriver {
        fn new(failing: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                failing: failing.iter().map(|s| (*s).to_string()).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TunnelDriver for ScriptedDriver {
        async fn run(
            &self,
            _token: CancellationToken,
            config: &WgConfig,
            _proxy: &ProxyConfig,
        ) -> Result<(), DriverError> {
            self.seen.lock().unwrap().push(config.clone());
            let endpoint = &config.peers[0].endpoint;
            if self.failing.contains(endpoint) {
                return Err(DriverError("scripted failure".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn rotates_past_failing_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(EndpointCache::new(tmp.path()));
        cache.save_endpoint("10.0.0.1:2408", Duration::from_millis(50));
        cache.save_endpoint("10.0.0.2:2408", Duration::from_millis(60));

        let driver = ScriptedDriver::new(&["10.0.0.1:2408"]);
        let engine = Engine::new(
            CancellationToken::new(),
            test_config(
                tmp.path(),
                vec!["10.0.0.1:2408".into(), "10.0.0.2:2408".into()],
            ),
            test_identity(),
            cache.clone(),
            driver.clone(),
        );

        engine.run().await.unwrap();

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].peers[0].endpoint, "10.0.0.1:2408");
        assert_eq!(seen[1].peers[0].endpoint, "10.0.0.2:2408");

        // The failure and the success were both recorded.
        let all = cache.get_all();
        let failed = all.iter().find(|e| e.address == "10.0.0.1:2408").unwrap();
        assert_eq!(failed.failures, 1);
        let good = all.iter().find(|e| e.address == "10.0.0.2:2408").unwrap();
        assert_eq!(good.failures, 0);
    }

    #[tokio::test]
    async fn user_provided_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(EndpointCache::new(tmp.path()));

        let driver = ScriptedDriver::new(&["10.0.0.1:2408"]);
        let mut config = test_config(tmp.path(), vec!["10.0.0.1:2408".into()]);
        config.user_provided_endpoint = true;

        let engine = Engine::new(
            CancellationToken::new(),
            config,
            test_identity(),
            cache,
            driver,
        );

        assert!(matches!(
            engine.run().await,
            Err(EngineError::Driver(_))
        ));
    }

    #[tokio::test]
    async fn empty_user_provided_list_has_no_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(EndpointCache::new(tmp.path()));

        let driver = ScriptedDriver::new(&[]);
        let mut config = test_config(tmp.path(), vec![]);
        config.user_provided_endpoint = true;

        let engine = Engine::new(
            CancellationToken::new(),
            config,
            test_identity(),
            cache,
            driver,
        );

        assert!(matches!(
            engine.run().await,
            Err(EngineError::NoEndpointAvailable)
        ));
    }

    #[tokio::test]
    async fn scan_path_overrides_keepalive() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(EndpointCache::new(tmp.path()));

        let driver = ScriptedDriver::new(&[]);
        let engine = Engine::new(
            CancellationToken::new(),
            test_config(tmp.path(), vec![]),
            test_identity(),
            cache,
            driver.clone(),
        );

        engine.run_tunnel("10.0.0.5:2408", true).await.unwrap();

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen[0].peers[0].endpoint, "10.0.0.5:2408");
        assert_eq!(seen[0].peers[0].keepalive, 5);
    }

    #[tokio::test]
    async fn falls_back_to_cached_endpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(EndpointCache::new(tmp.path()));
        cache.save_endpoint("10.0.0.9:2408", Duration::from_millis(42));

        let driver = ScriptedDriver::new(&[]);
        let engine = Engine::new(
            CancellationToken::new(),
            test_config(tmp.path(), vec![]),
            test_identity(),
            cache,
            driver.clone(),
        );

        engine.run().await.unwrap();

        let seen = driver.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].peers[0].endpoint, "10.0.0.9:2408");
        // Engine-level DNS override and the default keepalive apply.
        assert_eq!(seen[0].interface.dns, vec!["1.1.1.1".parse::<std::net::IpAddr>().unwrap()]);
        assert_eq!(seen[0].peers[0].keepalive, 25);
    }
}
