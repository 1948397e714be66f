//! The scan engine: drives the generators, probes candidates and feeds
//! the priority queue until cancelled.
//!
//! Each tick takes one address from every active generator and probes
//! them in parallel. Good results (RTT under the desirable threshold) go
//! into the queue and the endpoint cache. Once the queue reaches ideal
//! mode the engine parks until expiry frees a slot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ScanError;
use crate::generator::IpGenerator;
use crate::probe::WarpProbe;
use crate::queue::IpQueue;
use crate::types::ScannerOptions;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
const EXPIRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct ScanEngine {
    options: Arc<ScannerOptions>,
    generators: Vec<IpGenerator>,
    ip_queue: Arc<IpQueue>,
    probe: WarpProbe,
    token: CancellationToken,
}

impl ScanEngine {
    /// Build an engine over the option's CIDR list, filtered by the
    /// enabled address families. One generator per prefix.
    ///
    /// # Errors
    ///
    /// Returns an error when family filtering leaves no prefix to scan.
    pub fn new(
        token: CancellationToken,
        options: Arc<ScannerOptions>,
        ip_queue: Arc<IpQueue>,
    ) -> Result<Self, ScanError> {
        let mut generators = Vec::new();
        for cidr in &options.cidr_list {
            let is_v6 = matches!(cidr, ipnet::IpNet::V6(_));
            if is_v6 && !options.use_ipv6 {
                continue;
            }
            if !is_v6 && !options.use_ipv4 {
                continue;
            }
            generators.push(IpGenerator::new(std::slice::from_ref(cidr)));
        }

        if generators.is_empty() {
            return Err(ScanError::invalid_config(
                "no scannable prefixes for the enabled address families",
            ));
        }

        let probe = WarpProbe::from_options(&options);

        Ok(Self {
            options,
            generators,
            ip_queue,
            probe,
            token,
        })
    }

    /// Run until cancelled. The engine never stops on its own when the
    /// queue is ideal; consumers watch the queue snapshot and cancel.
    pub async fn run(&mut self) {
        let mut processed_ips = 0usize;
        let mut last_progress = Instant::now();

        loop {
            if self.token.is_cancelled() {
                info!("Scanner done");
                return;
            }

            self.ip_queue.expire();

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                info!(
                    processed_ips,
                    found_ips = self.ip_queue.size(),
                    "Scanning progress"
                );
                last_progress = Instant::now();
            }

            if self.ip_queue.is_ideal() {
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = self.ip_queue.wait_available() => {}
                    () = tokio::time::sleep(EXPIRY_INTERVAL) => {}
                }
                continue;
            }

            let probed = self.scan_tick().await;
            processed_ips += probed;

            if probed == 0 {
                // Every generator is exhausted; nothing left to do but
                // wait for expiry to demand a rescan or for cancellation.
                tokio::select! {
                    () = self.token.cancelled() => {}
                    () = tokio::time::sleep(EXPIRY_INTERVAL) => {}
                }
            }
        }
    }

    /// One tick: take the next address from each generator and probe them
    /// concurrently. Returns how many addresses were probed.
    async fn scan_tick(&mut self) -> usize {
        let mut tasks = JoinSet::new();

        for generator in &mut self.generators {
            let Some(ip) = generator.next() else { continue };
            let probe = self.probe.clone();
            let options = self.options.clone();
            let ip_queue = self.ip_queue.clone();
            let token = self.token.child_token();

            tasks.spawn(async move {
                ping_addr(&probe, &token, &options, &ip_queue, ip).await;
            });
        }

        let mut probed = 0;
        while tasks.join_next().await.is_some() {
            probed += 1;
        }
        probed
    }
}

async fn ping_addr(
    probe: &WarpProbe,
    token: &CancellationToken,
    options: &ScannerOptions,
    ip_queue: &IpQueue,
    ip: std::net::IpAddr,
) {
    debug!(%ip, "Pinging IP");

    let info = match probe.probe(token, ip).await {
        Ok(info) => info,
        Err(err) => {
            debug!(%ip, error = %err, "Ping failed");
            return;
        }
    };

    if info.rtt <= options.max_desirable_rtt {
        if let Some(cache) = &options.cache {
            cache.save_endpoint(&info.addr_port.to_string(), info.rtt);
        }
        ip_queue.enqueue(info);
        info!(addr = %info.addr_port, rtt = ?info.rtt, "Found desirable IP");
    } else {
        debug!(addr = %info.addr_port, rtt = ?info.rtt, "IP pinged but RTT is too high");
    }
}
