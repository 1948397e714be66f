//! Lazy IP address generation over CIDR ranges.
//!
//! A /48 IPv6 prefix spans 2^80 addresses, so ranges carry a `u128` cursor
//! and are never materialised; scans are bounded by time, not exhaustion.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;

/// The integer interval `[network, broadcast]` of one CIDR, with a
/// monotonic cursor. Exhausted when the cursor passes the broadcast
/// address.
#[derive(Debug, Clone)]
pub struct IpRange {
    start: u128,
    current: u128,
    end: u128,
    is_ipv4: bool,
}

fn addr_to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn u128_to_addr(value: u128, is_ipv4: bool) -> IpAddr {
    if is_ipv4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

impl IpRange {
    /// Build the range covered by a prefix. Network and broadcast
    /// addresses are both included; every address is a valid probe target.
    #[must_use]
    pub fn new(cidr: IpNet) -> Self {
        let start = addr_to_u128(cidr.network());
        let end = addr_to_u128(cidr.broadcast());
        Self {
            start,
            current: start,
            end,
            is_ipv4: matches!(cidr, IpNet::V4(_)),
        }
    }

    /// The next address in the range, or `None` once exhausted.
    pub fn next(&mut self) -> Option<IpAddr> {
        if self.current > self.end {
            return None;
        }
        let addr = u128_to_addr(self.current, self.is_ipv4);
        self.current += 1;
        Some(addr)
    }

    /// Every address in the range. Only sensible for small prefixes; used
    /// by the connection bootstrap against a resolved /24.
    #[must_use]
    pub fn get_all(&self) -> Vec<IpAddr> {
        let mut addrs = Vec::new();
        let mut current = self.start;
        while current <= self.end {
            addrs.push(u128_to_addr(current, self.is_ipv4));
            current += 1;
        }
        addrs
    }
}

/// Lazily enumerates addresses from an ordered list of CIDR prefixes.
/// Exhausting one prefix advances to the next; exhausting all yields
/// `None`. Non-restartable.
#[derive(Debug, Clone)]
pub struct IpGenerator {
    ranges: Vec<IpRange>,
    current_range: usize,
}

impl IpGenerator {
    /// Build a generator over the given prefixes, in order.
    #[must_use]
    pub fn new(cidrs: &[IpNet]) -> Self {
        Self {
            ranges: cidrs.iter().map(|cidr| IpRange::new(*cidr)).collect(),
            current_range: 0,
        }
    }

    /// The next unique address across all prefixes, or `None` when every
    /// range is exhausted.
    pub fn next(&mut self) -> Option<IpAddr> {
        while self.current_range < self.ranges.len() {
            if let Some(addr) = self.ranges[self.current_range].next() {
                return Some(addr);
            }
            self.current_range += 1;
        }
        None
    }

    /// Every address from every range. Bulk form for small prefixes only.
    #[must_use]
    pub fn get_all(&self) -> Vec<IpAddr> {
        self.ranges.iter().flat_map(IpRange::get_all).collect()
    }
}
