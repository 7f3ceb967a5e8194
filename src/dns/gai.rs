//! System DNS resolver using getaddrinfo.
//!
//! Resolution runs on `tokio::task::spawn_blocking` so a slow lookup never
//! blocks the runtime.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::neterror::NetError;
use std::net::{IpAddr, ToSocketAddrs};

/// System DNS resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            if let Some(ip) = IpLiteral::parse(name.as_str()) {
                return Ok(Box::new(std::iter::once(ip)) as Addrs);
            }

            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await;

            let addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::NameNotResolved
                })?
                .map_err(|e| {
                    tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
                    NetError::NameNotResolved
                })?;

            if addrs.is_empty() {
                tracing::debug!(domain = %domain, "no addresses returned by getaddrinfo");
                return Err(NetError::NameNotResolved);
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Parsing of hosts that are already IP addresses.
pub struct IpLiteral;

impl IpLiteral {
    /// Returns the address if `host` is an IPv4 or IPv6 literal, with or
    /// without the brackets URLs put around IPv6 addresses.
    pub fn parse(host: &str) -> Option<IpAddr> {
        let bare = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        bare.parse::<IpAddr>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ip_literal_v4() {
        assert_eq!(
            IpLiteral::parse("127.0.0.1"),
            Some(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
        );
    }

    #[test]
    fn test_ip_literal_v6() {
        assert_eq!(IpLiteral::parse("::1"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(
            IpLiteral::parse("[::1]"),
            Some(IpAddr::V6(Ipv6Addr::LOCALHOST))
        );
    }

    #[test]
    fn test_ip_literal_hostname() {
        assert!(IpLiteral::parse("example.com").is_none());
    }

    #[tokio::test]
    async fn test_gai_literal_short_circuit() {
        let addrs: Vec<_> = GaiResolver::new()
            .resolve(Name::new("10.1.2.3"))
            .await
            .unwrap()
            .collect();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))]);
    }
}
