//! # cfwarp-api
//!
//! Client for the Cloudflare WARP registration API, plus the pieces of
//! client state that live next to it:
//!
//! - The REST client for `api.cloudflareclient.com` (device registration,
//!   account and license management, bound devices)
//! - The identity model and its on-disk form (`reg.json` / `conf.json`)
//! - WARP network constants: the probe CIDR ranges and the known
//!   data-plane port set
//! - Data-directory resolution

#![warn(clippy::all)]

pub mod client;
pub mod datadir;
pub mod error;
pub mod identity;
pub mod model;
pub mod network;

pub use client::WarpApi;
pub use error::ApiError;
pub use model::{Identity, IdentityAccount, IdentityDevice, License};
