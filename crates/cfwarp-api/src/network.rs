//! WARP network constants: probe CIDR ranges and the data-plane port set.

use std::net::{IpAddr, SocketAddr};

use ipnet::IpNet;
use rand::seq::SliceRandom;
use rand::Rng;

/// The known WARP data-plane ports, in the order the upstream client
/// probes them.
pub const SCANNER_PORTS: [u16; 58] = [
    443, 500, 854, 859, 864, 878, 880, 890, 891, 894, 903, 908, 928, 934, 939, 942, 943, 945, 946,
    955, 968, 987, 988, 1002, 1010, 1014, 1018, 1070, 1074, 1180, 1387, 1701, 1843, 2371, 2408,
    2506, 3138, 3476, 3581, 3854, 4177, 4198, 4233, 4443, 4500, 5279, 5956, 7103, 7152, 7156,
    7281, 7559, 8095, 8319, 8443, 8742, 8854, 8886,
];

const SCANNER_PREFIX_STRINGS: [&str; 8] = [
    "162.159.192.0/24",
    "162.159.195.0/24",
    "188.114.96.0/24",
    "188.114.97.0/24",
    "188.114.98.0/24",
    "188.114.99.0/24",
    "2606:4700:d0::/48",
    "2606:4700:d1::/48",
];

/// The CIDR ranges WARP endpoints are drawn from: six IPv4 /24s followed
/// by two IPv6 /48s.
#[must_use]
pub fn scanner_prefixes() -> Vec<IpNet> {
    SCANNER_PREFIX_STRINGS
        .iter()
        .map(|s| s.parse().expect("built-in prefix is valid"))
        .collect()
}

/// Pick a random scanner prefix matching the enabled address families.
///
/// Returns `None` when both families are disabled.
#[must_use]
pub fn random_scanner_prefix(v4: bool, v6: bool) -> Option<IpNet> {
    let pool: Vec<IpNet> = scanner_prefixes()
        .into_iter()
        .filter(|prefix| match prefix {
            IpNet::V4(_) => v4,
            IpNet::V6(_) => v6,
        })
        .collect();
    pool.choose(&mut rand::thread_rng()).copied()
}

/// Pick a random port from the scanner port set.
#[must_use]
pub fn random_scanner_port() -> u16 {
    *SCANNER_PORTS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&2408)
}

/// Pick a random endpoint: a random address inside a random scanner
/// prefix, at a random scanner port.
#[must_use]
pub fn random_scanner_endpoint(v4: bool, v6: bool) -> Option<SocketAddr> {
    let prefix = random_scanner_prefix(v4, v6)?;
    let addr = random_addr_in_prefix(&prefix);
    Some(SocketAddr::new(addr, random_scanner_port()))
}

fn random_addr_in_prefix(prefix: &IpNet) -> IpAddr {
    let mut rng = rand::thread_rng();
    match prefix {
        IpNet::V4(net) => {
            let base = u32::from(net.network());
            let span = 1u64 << (32 - net.prefix_len());
            let offset = rng.gen_range(0..span) as u32;
            IpAddr::V4((base + offset).into())
        }
        IpNet::V6(net) => {
            let base = u128::from(net.network());
            let host_bits = 128 - u32::from(net.prefix_len());
            let offset = if host_bits >= 128 {
                rng.gen::<u128>()
            } else {
                rng.gen_range(0..(1u128 << host_bits))
            };
            IpAddr::V6((base + offset).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_list_shape() {
        let prefixes = scanner_prefixes();
        assert_eq!(prefixes.len(), 8);
        assert_eq!(
            prefixes
                .iter()
                .filter(|p| matches!(p, IpNet::V4(_)))
                .count(),
            6
        );
        assert_eq!(
            prefixes
                .iter()
                .filter(|p| matches!(p, IpNet::V6(_)))
                .count(),
            2
        );
    }

    #[test]
    fn port_set_is_complete() {
        assert_eq!(SCANNER_PORTS.len(), 58);
        assert!(SCANNER_PORTS.contains(&2408));
        assert!(SCANNER_PORTS.contains(&500));
        assert!(SCANNER_PORTS.contains(&8886));
    }

    #[test]
    fn random_prefix_respects_families() {
        for _ in 0..32 {
            let prefix = random_scanner_prefix(true, false).unwrap();
            assert!(matches!(prefix, IpNet::V4(_)));
            let prefix = random_scanner_prefix(false, true).unwrap();
            assert!(matches!(prefix, IpNet::V6(_)));
        }
        assert!(random_scanner_prefix(false, false).is_none());
    }

    #[test]
    fn random_endpoint_inside_known_ranges() {
        let prefixes = scanner_prefixes();
        for _ in 0..32 {
            let endpoint = random_scanner_endpoint(true, true).unwrap();
            assert!(prefixes.iter().any(|p| p.contains(&endpoint.ip())));
            assert!(SCANNER_PORTS.contains(&endpoint.port()));
        }
    }
}
