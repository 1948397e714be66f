//! Identity to WireGuard configuration mapping.

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ipnet::IpNet;

use cfwarp_api::Identity;

use crate::error::EngineError;

/// Zero preshared key: WARP does not use one.
const ZERO_PSK: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const TUNNEL_MTU: u16 = 1280;
const DEFAULT_KEEPALIVE: u16 = 25;

/// Persistent keepalive used on endpoints found by scanning, where NAT
/// bindings tend to be short-lived.
pub const SCAN_KEEPALIVE: u16 = 5;

/// WireGuard interface section.
#[derive(Debug, Clone)]
pub struct WgInterface {
    /// Private key, hex-encoded.
    pub private_key: String,
    pub addresses: Vec<IpNet>,
    pub mtu: u16,
    pub dns: Vec<IpAddr>,
}

/// WireGuard peer section.
#[derive(Debug, Clone)]
pub struct WgPeer {
    /// Peer public key, hex-encoded.
    pub public_key: String,
    /// Preshared key, hex-encoded.
    pub preshared_key: String,
    pub allowed_ips: Vec<IpNet>,
    pub keepalive: u16,
    pub endpoint: String,
}

/// A complete WireGuard configuration for the tunnel driver.
#[derive(Debug, Clone)]
pub struct WgConfig {
    pub interface: WgInterface,
    pub peers: Vec<WgPeer>,
}

/// Re-encode a base64 key as hex, the form WireGuard config files use.
///
/// # Errors
///
/// Returns an error when the input is not valid base64.
pub fn base64_to_hex(key: &str) -> Result<String, EngineError> {
    let bytes = BASE64
        .decode(key)
        .map_err(|_| EngineError::invalid_config("key is not valid base64"))?;
    Ok(hex::encode(bytes))
}

/// Parse a CIDR, or a bare address as a host-length prefix.
fn parse_prefix_or_addr(value: &str) -> Result<IpNet, EngineError> {
    value
        .parse::<IpNet>()
        .or_else(|_| value.parse::<IpAddr>().map(IpNet::from))
        .map_err(|_| EngineError::invalid_config("invalid interface address in identity"))
}

/// Build the WireGuard configuration for an identity: hex keys, the
/// assigned interface addresses, WARP's DNS set, a full-tunnel allowed-IP
/// list and a zero preshared key.
///
/// # Errors
///
/// Returns an error when the identity carries no peers, malformed keys
/// or unusable interface addresses.
pub fn generate_wireguard_config(identity: &Identity) -> Result<WgConfig, EngineError> {
    let peer = identity
        .config
        .peers
        .first()
        .ok_or(EngineError::invalid_config("identity contains 0 peers"))?;

    let private_key = base64_to_hex(&identity.private_key)?;
    let public_key = base64_to_hex(&peer.public_key)?;

    let addresses = vec![
        parse_prefix_or_addr(&identity.config.interface.addresses.v4)?,
        parse_prefix_or_addr(&identity.config.interface.addresses.v6)?,
    ];

    let dns = ["1.1.1.1", "1.0.0.1", "2606:4700:4700::1112", "2606:4700:4700::1112"]
        .iter()
        .filter_map(|addr| addr.parse().ok())
        .collect();

    let allowed_ips = vec![
        "0.0.0.0/0".parse().expect("valid prefix"),
        "::/0".parse().expect("valid prefix"),
    ];

    Ok(WgConfig {
        interface: WgInterface {
            private_key,
            addresses,
            mtu: TUNNEL_MTU,
            dns,
        },
        peers: vec![WgPeer {
            public_key,
            preshared_key: ZERO_PSK.to_string(),
            allowed_ips,
            keepalive: DEFAULT_KEEPALIVE,
            endpoint: peer.endpoint.host.clone(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfwarp_api::model::{
        IdentityConfig, IdentityConfigInterfaceAddresses, IdentityConfigPeer,
        IdentityConfigPeerEndpoint,
    };

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

    #[test]
    fn base64_to_hex_roundtrip() {
        let hex_key = base64_to_hex(&BASE64.encode([0xABu8; 32])).unwrap();
        assert_eq!(hex_key, "ab".repeat(32));
        assert!(base64_to_hex("!!!").is_err());
    }

    #[test]
    fn config_mapping() {
        let config = generate_wireguard_config(&test_identity()).unwrap();

        assert_eq!(config.interface.private_key, "01".repeat(32));
        assert_eq!(config.interface.mtu, 1280);
        assert_eq!(config.interface.dns.len(), 4);
        assert_eq!(config.interface.addresses.len(), 2);
        assert_eq!(config.interface.addresses[0].prefix_len(), 32);
        assert_eq!(config.interface.addresses[1].prefix_len(), 128);

        let peer = &config.peers[0];
        assert_eq!(peer.public_key, "02".repeat(32));
        assert_eq!(peer.preshared_key, ZERO_PSK);
        assert_eq!(peer.keepalive, 25);
        assert_eq!(peer.endpoint, "engage.cloudflareclient.com:2408");
        assert_eq!(
            peer.allowed_ips,
            vec![
                "0.0.0.0/0".parse::<IpNet>().unwrap(),
                "::/0".parse::<IpNet>().unwrap()
            ]
        );
    }

    #[test]
    fn prefixed_interface_addresses_pass_through() {
        let mut identity = test_identity();
        identity.config.interface.addresses.v4 = "172.16.0.2/31".into();
        let config = generate_wireguard_config(&identity).unwrap();
        assert_eq!(config.interface.addresses[0].prefix_len(), 31);
    }

    #[test]
    fn zero_peers_is_rejected() {
        let mut identity = test_identity();
        identity.config.peers.clear();
        assert!(matches!(
            generate_wireguard_config(&identity),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
