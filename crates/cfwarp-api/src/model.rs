//! Wire and on-disk models for WARP identities.
//!
//! The API returns far more metadata than the client needs; every field is
//! kept so identities survive a load/save round trip without data loss.

use serde::{Deserialize, Serialize};

/// Peer endpoint advertised inside an identity config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigPeerEndpoint {
    #[serde(default)]
    pub v4: String,
    #[serde(default)]
    pub v6: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

/// A peer entry inside an identity config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigPeer {
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub endpoint: IdentityConfigPeerEndpoint,
}

/// Tunnel interface addresses assigned by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigInterfaceAddresses {
    #[serde(default)]
    pub v4: String,
    #[serde(default)]
    pub v6: String,
}

/// Tunnel interface section of an identity config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigInterface {
    #[serde(default)]
    pub addresses: IdentityConfigInterfaceAddresses,
}

/// Auxiliary services advertised by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfigServices {
    #[serde(default)]
    pub http_proxy: String,
}

/// The `config` block of an identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub peers: Vec<IdentityConfigPeer>,
    #[serde(default)]
    pub interface: IdentityConfigInterface,
    #[serde(default)]
    pub services: IdentityConfigServices,
    #[serde(default)]
    pub client_id: String,
}

/// Account state attached to a registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityAccount {
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub premium_data: i64,
    #[serde(default)]
    pub warp_plus: bool,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub referral_renewal_countdown: i64,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub usage: i64,
    #[serde(default)]
    pub referral_count: i64,
    #[serde(default)]
    pub ttl: String,
}

/// A full WARP identity: the registration record plus local key material.
///
/// `private_key` is filled in locally after registration and never sent to
/// the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub account: IdentityAccount,
    #[serde(default)]
    pub place: i64,
    #[serde(default)]
    pub fcm_token: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tos: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub install_id: String,
    #[serde(default)]
    pub warp_enabled: bool,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub config: IdentityConfig,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub waitlist_enabled: bool,
}

/// A device bound to the same account as this registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityDevice {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created: String,
    #[serde(default, rename = "updated")]
    pub activated: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub role: String,
}

/// A WARP+ license key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct License {
    #[serde(default)]
    pub license: String,
}

/// On-disk form of `reg.json`: the secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegFile {
    pub registration_id: String,
    pub token: String,
    pub private_key: String,
}

/// On-disk form of `conf.json`: the non-secret remainder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfFile {
    pub account: IdentityAccount,
    pub config: IdentityConfig,
}

/// On-disk form of `settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsFile {
    pub operation_mode: String,
}
