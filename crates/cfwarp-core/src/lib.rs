//! # cfwarp-core
//!
//! The WARP connection engine: picks the best data-plane endpoint (from a
//! scan, user input, the endpoint cache, or a DNS-derived fallback),
//! assembles the WireGuard configuration from the device identity and
//! hands it to a [`tunnel::TunnelDriver`], rotating endpoints on failure.

#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod scan;
pub mod tunnel;
pub mod wireguard;

pub use config::{Config, ProxyConfig, ScanOptions};
pub use engine::Engine;
pub use error::EngineError;
pub use scan::{run_scan, DEFAULT_SCAN_TIMEOUT};
pub use tunnel::{DriverError, TunnelDriver};
pub use wireguard::{generate_wireguard_config, WgConfig, WgInterface, WgPeer};
