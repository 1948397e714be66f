//! cfwarp command-line client.
//!
//! Discovery and device management live here; the connection engine and
//! its tunnel-driver seam are library surfaces in `cfwarp-core`, consumed
//! by embedding applications.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cfwarp_api::datadir::ensure_data_dir;
use cfwarp_api::identity::{create_or_update_identity, load_identity, save_identity};
use cfwarp_api::WarpApi;
use cfwarp_scanner::{EndpointCache, IpScanner};

/// Cloudflare WARP endpoint discovery and device management
#[derive(Parser)]
#[command(name = "cfwarp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Client data directory (defaults to ~/.cloudflare-warp)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for the fastest WARP endpoints
    Scan {
        /// Only scan IPv4 ranges
        #[arg(short = '4', long)]
        ipv4: bool,

        /// Only scan IPv6 ranges
        #[arg(short = '6', long)]
        ipv6: bool,

        /// Maximum acceptable round-trip time in milliseconds
        #[arg(long, default_value_t = 1000)]
        rtt: u64,
    },

    /// Show the registered device and the cached endpoints
    Status,

    /// Register this device, or apply a license to it
    Register {
        /// WARP+ license key
        #[arg(long)]
        license: Option<String>,
    },

    /// Update the registered device's name or license key
    Update {
        /// New device name
        #[arg(short = 'n', long)]
        name: Option<String>,

        /// New license key
        #[arg(short = 'k', long)]
        license: Option<String>,
    },

    /// Generate a WireGuard keypair
    Keygen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let data_dir = ensure_data_dir(cli.data_dir.clone()).context("resolving data directory")?;

    match cli.command {
        Commands::Scan { ipv4, ipv6, rtt } => scan(&data_dir, ipv4, ipv6, rtt).await,
        Commands::Status => status(&data_dir).await,
        Commands::Register { license } => register(&data_dir, license.as_deref()).await,
        Commands::Update { name, license } => {
            update(&data_dir, name.as_deref(), license.as_deref()).await
        }
        Commands::Keygen => {
            let keys = cfwarp_api::identity::generate_keypair();
            println!("private key: {}", keys.private_key);
            println!("public key:  {}", keys.public_key);
            Ok(())
        }
    }
}

async fn scan(data_dir: &std::path::Path, ipv4: bool, ipv6: bool, rtt_ms: u64) -> anyhow::Result<()> {
    let identity = load_identity(data_dir)
        .context("no WARP identity found; run 'cfwarp register' to create one")?;
    let peer_public_key = identity
        .config
        .peers
        .first()
        .map(|peer| peer.public_key.clone())
        .context("identity contains 0 peers")?;

    // Both flags or neither means scan both families.
    let (use_v4, use_v6) = if ipv4 == ipv6 { (true, true) } else { (ipv4, ipv6) };

    let cache = Arc::new(EndpointCache::new(data_dir));
    if let Err(err) = cache.load() {
        tracing::warn!(error = %err, "Failed to load existing IP scan cache; starting with an empty cache");
    }

    let token = CancellationToken::new();
    let scanner = Arc::new(
        IpScanner::new()
            .with_use_ipv4(use_v4)
            .with_use_ipv6(use_v6)
            .with_max_desirable_rtt(Duration::from_millis(rtt_ms))
            .with_ip_queue_size(0xffff)
            .with_warp_private_key(identity.private_key.clone())
            .with_warp_peer_public_key(peer_public_key)
            .with_cache(cache)
            .with_cancellation(&token),
    );

    info!("Starting IP scanning...");
    info!("Press CTRL+C to stop the scanner at any time.");

    let ctrl_c = token.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupt signal received, stopping scanner...");
        ctrl_c.cancel();
    });

    scanner.run().await?;
    info!("IP scanning process completed.");

    let results = scanner.available_ips();
    if results.is_empty() {
        info!("No desirable IP endpoints were found during the scan.");
        return Ok(());
    }

    println!("{:<28} {:>12}", "Address", "RTT (ping)");
    for info in results {
        println!("{:<28} {:>9} ms", info.addr_port, info.rtt.as_millis());
    }

    Ok(())
}

async fn status(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let identity = load_identity(data_dir)
        .context("no WARP identity found; run 'cfwarp register' to create one")?;

    println!("registration id: {}", identity.id);
    println!("account type:    {}", identity.account.account_type);
    println!("warp+ enabled:   {}", identity.account.warp_plus);
    if !identity.account.license.is_empty() {
        println!("license:         {}", identity.account.license);
    }

    let cache = EndpointCache::new(data_dir);
    if let Err(err) = cache.load() {
        tracing::warn!(error = %err, "Failed to load endpoint cache");
    }

    let endpoints = cache.get_all();
    if endpoints.is_empty() {
        println!("\nno cached endpoints; run 'cfwarp scan' to discover some");
        return Ok(());
    }

    println!("\n{:<28} {:>12} {:>10}", "Endpoint", "RTT", "Failures");
    for endpoint in endpoints {
        println!(
            "{:<28} {:>9} ms {:>10}",
            endpoint.address,
            endpoint.rtt.as_millis(),
            endpoint.failures
        );
    }

    Ok(())
}

async fn register(data_dir: &std::path::Path, license: Option<&str>) -> anyhow::Result<()> {
    let api = WarpApi::new();
    let identity = create_or_update_identity(&api, data_dir, license.unwrap_or_default())
        .await
        .context("registration failed")?;
    save_identity(data_dir, &identity).context("saving identity files")?;

    info!(id = %identity.id, "WARP device registered");
    println!("registration id: {}", identity.id);
    println!("account type:    {}", identity.account.account_type);

    Ok(())
}

fn validate_update_args(name: Option<&str>, license: Option<&str>) -> anyhow::Result<()> {
    let has_name = name.is_some_and(|n| !n.is_empty());
    let has_license = license.is_some_and(|l| !l.is_empty());
    if !has_name && !has_license {
        anyhow::bail!("at least one of --name or --license must be provided");
    }
    Ok(())
}

async fn update(
    data_dir: &std::path::Path,
    name: Option<&str>,
    license: Option<&str>,
) -> anyhow::Result<()> {
    validate_update_args(name, license)?;

    let mut identity = load_identity(data_dir)
        .context("no WARP identity found; run 'cfwarp register' to create one")?;
    let api = WarpApi::new();

    if let Some(name) = name.filter(|n| !n.is_empty()) {
        api.update_device(
            &identity.token,
            &identity.id,
            &serde_json::json!({ "name": name }),
        )
        .await
        .context("failed to update device name")?;
        info!("Device name updated successfully.");
    }

    if let Some(license) = license.filter(|l| !l.is_empty()) {
        identity = create_or_update_identity(&api, data_dir, license)
            .await
            .context("failed to update license")?;
        info!("License updated successfully.");
    }

    save_identity(data_dir, &identity).context("saving identity files")?;
    info!("Local configuration files updated.");

    Ok(())
}
