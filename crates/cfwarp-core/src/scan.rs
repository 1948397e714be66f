//! Scan driver: runs the IP scanner and waits for enough good results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnet::IpNet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cfwarp_api::Identity;
use cfwarp_scanner::{EndpointCache, IpInfo, IpScanner, ScanError};

use crate::config::ScanOptions;

/// Overall deadline for a scan to produce two usable endpoints.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
const CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Number of endpoints a scan must deliver.
const REQUIRED_RESULTS: usize = 2;

/// Drive a scan until it finds two endpoints or the deadline passes.
///
/// The scanner runs in the background with the identity's key material;
/// this function polls its result queue every 250 ms, logs progress every
/// 5 seconds, and tears the scanner down on every exit path.
///
/// # Errors
///
/// Returns [`ScanError::Timeout`] when the deadline elapses first and
/// [`ScanError::Cancelled`] when the caller's token fires.
pub async fn run_scan(
    token: &CancellationToken,
    options: &ScanOptions,
    identity: &Identity,
    cidrs: Vec<IpNet>,
    cache: Arc<EndpointCache>,
    timeout: Duration,
) -> Result<Vec<IpInfo>, ScanError> {
    let peer_public_key = identity
        .config
        .peers
        .first()
        .map(|peer| peer.public_key.clone())
        .ok_or(ScanError::invalid_config("identity contains 0 peers"))?;

    let scanner = Arc::new(
        IpScanner::new()
            .with_use_ipv4(options.use_ipv4)
            .with_use_ipv6(options.use_ipv6)
            .with_max_desirable_rtt(options.max_rtt)
            .with_cidr_list(cidrs)
            .with_warp_private_key(identity.private_key.clone())
            .with_warp_peer_public_key(peer_public_key)
            .with_cache(cache)
            .with_cancellation(token),
    );

    let runner = tokio::spawn({
        let scanner = scanner.clone();
        async move {
            if let Err(err) = scanner.run().await {
                error!(error = %err, "IP scanner encountered a fatal error during execution");
            }
        }
    });

    let started = Instant::now();
    info!("Initiating IP scan process...");

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut progress = tokio::time::interval_at(
        tokio::time::Instant::now() + PROGRESS_INTERVAL,
        PROGRESS_INTERVAL,
    );
    let mut check = tokio::time::interval(CHECK_INTERVAL);

    let result = loop {
        tokio::select! {
            () = token.cancelled() => break Err(ScanError::Cancelled),
            () = &mut deadline => break Err(ScanError::Timeout),
            _ = progress.tick() => {
                info!(elapsed = ?started.elapsed(), "IP scan in progress");
            }
            _ = check.tick() => {
                let ips = scanner.available_ips();
                if ips.len() >= REQUIRED_RESULTS {
                    info!(
                        endpoints_found = REQUIRED_RESULTS,
                        duration = ?started.elapsed(),
                        "IP scan completed successfully"
                    );
                    break Ok(ips[..REQUIRED_RESULTS].to_vec());
                }
            }
        }
    };

    scanner.stop();
    let _ = runner.await;

    result
}
