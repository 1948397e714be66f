//! Bootstrap DNS resolution against a caller-chosen server.

use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

use crate::error::EngineError;

/// Resolve a hostname to its first IPv4 address using the given DNS
/// server. The /24 bootstrap derivation only makes sense for IPv4, so
/// AAAA answers are skipped.
///
/// # Errors
///
/// Returns [`EngineError::Dns`] when the lookup fails or yields no A
/// records.
pub async fn resolve_ipv4(host: &str, dns_server: IpAddr) -> Result<Ipv4Addr, EngineError> {
    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(
        SocketAddr::new(dns_server, 53),
        Protocol::Udp,
    ));
    let resolver = TokioAsyncResolver::tokio(config, ResolverOpts::default());

    debug!(host, server = %dns_server, "Resolving bootstrap host");
    let lookup = resolver
        .lookup_ip(host)
        .await
        .map_err(|err| EngineError::Dns(Cow::Owned(err.to_string())))?;

    lookup
        .iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or(EngineError::Dns(Cow::Borrowed("no A records for host")))
}
