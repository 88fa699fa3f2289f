//! Endpoint resolution shared by the TCP-family and UDP transports.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use devio_rs_protocol::HostPort;
use tracing::debug;

/// Resolve a host/port to candidate socket addresses.
///
/// A bracketed (IPv6) host restricts the candidates to IPv6; otherwise both
/// families are accepted in resolver order. An empty host yields the wildcard
/// addresses (IPv6 first), for server streams binding all interfaces.
pub(crate) async fn resolve(endpoint: &HostPort) -> Result<Vec<SocketAddr>, String> {
    if endpoint.host.is_empty() {
        let mut addrs = vec![SocketAddr::new(
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            endpoint.port,
        )];
        if !endpoint.ipv6 {
            addrs.push(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                endpoint.port,
            ));
        }
        return Ok(addrs);
    }

    let candidates = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| e.to_string())?;

    let mut addrs = Vec::new();
    for addr in candidates {
        let use_addr = !endpoint.ipv6 || addr.is_ipv6();
        debug!(
            "resolve {} -> {} ({})",
            endpoint,
            addr,
            if use_addr { "use" } else { "skip" }
        );
        if use_addr {
            addrs.push(addr);
        }
    }
    if addrs.is_empty() {
        return Err(format!("no usable address for {endpoint}"));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str, port: u16, ipv6: bool) -> HostPort {
        HostPort {
            host: host.to_owned(),
            port,
            ipv6,
        }
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let addrs = resolve(&endpoint("localhost", 12345, false)).await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 12345));
    }

    #[tokio::test]
    async fn empty_host_is_wildcard() {
        let addrs = resolve(&endpoint("", 9000, false)).await.unwrap();
        assert_eq!(addrs[0].ip(), IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(addrs[1].ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn ipv6_host_filters_families() {
        let addrs = resolve(&endpoint("::1", 12345, true)).await.unwrap();
        assert!(addrs.iter().all(|a| a.is_ipv6()));
    }

    #[tokio::test]
    async fn bad_host_fails() {
        assert!(resolve(&endpoint("no.such.host.invalid", 1, false)).await.is_err());
    }
}
