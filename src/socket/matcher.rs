//! Non-proxy host matching.
//!
//! Entries come in three shapes:
//! - an exact host name: `intranet`
//! - a domain suffix with a leading dot: `.example.com`
//! - an address and mask: `10.0.0.0/255.255.255.0`
//!
//! Adding an entry twice is a no-op; removing an unknown entry reports
//! `false`.

use crate::base::neterror::NetError;
use crate::dns::IpLiteral;
use std::collections::HashSet;
use std::net::IpAddr;

/// List of hosts that are reached directly rather than through the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonProxyList {
    hosts: HashSet<String>,
    domains: Vec<String>,
    subnets: Vec<Subnet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subnet {
    addr: Vec<u8>,
    mask: Vec<u8>,
}

impl Subnet {
    fn parse(entry: &str) -> Result<Self, NetError> {
        let (addr, mask) = entry.split_once('/').ok_or(NetError::InvalidNonProxyEntry)?;
        let addr = octets(addr.trim())?;
        let mask = octets(mask.trim())?;
        if addr.len() != mask.len() {
            tracing::debug!(entry = %entry, "address and mask lengths differ");
            return Err(NetError::InvalidNonProxyEntry);
        }
        Ok(Self { addr, mask })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        let raw = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        raw.len() == self.addr.len()
            && raw
                .iter()
                .zip(self.addr.iter().zip(&self.mask))
                .all(|(b, (a, m))| b & m == a & m)
    }
}

/// Parse a dotted-decimal octet list. Partial addresses (`34.56.78`) are
/// accepted and only ever match addresses of the same length.
fn octets(s: &str) -> Result<Vec<u8>, NetError> {
    if let Some(ip) = IpLiteral::parse(s) {
        return Ok(match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        });
    }
    s.split('.')
        .map(|part| part.parse::<u8>().map_err(|_| NetError::InvalidNonProxyEntry))
        .collect()
}

impl NonProxyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from entries separated by `|` or `,`.
    pub fn parse(list: &str) -> Result<Self, NetError> {
        let mut out = Self::new();
        for entry in list.split(['|', ',']).map(str::trim) {
            if !entry.is_empty() {
                out.dont_proxy_for(entry)?;
            }
        }
        Ok(out)
    }

    /// Add an entry. Duplicates are ignored.
    pub fn dont_proxy_for(&mut self, entry: &str) -> Result<(), NetError> {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            return Err(NetError::InvalidNonProxyEntry);
        }

        if entry.contains('/') {
            let subnet = Subnet::parse(&entry)?;
            if !self.subnets.contains(&subnet) {
                self.subnets.push(subnet);
            }
        } else if entry.starts_with('.') {
            if !self.domains.contains(&entry) {
                self.domains.push(entry);
            }
        } else {
            self.hosts.insert(entry);
        }
        Ok(())
    }

    /// Remove an entry; returns whether it was present.
    pub fn do_proxy_for(&mut self, entry: &str) -> Result<bool, NetError> {
        let entry = entry.trim().to_ascii_lowercase();

        if entry.contains('/') {
            let subnet = Subnet::parse(&entry)?;
            let before = self.subnets.len();
            self.subnets.retain(|s| s != &subnet);
            Ok(self.subnets.len() != before)
        } else if entry.starts_with('.') {
            let before = self.domains.len();
            self.domains.retain(|d| d != &entry);
            Ok(self.domains.len() != before)
        } else {
            Ok(self.hosts.remove(&entry))
        }
    }

    /// Whether `host` bypasses the proxy. Address/mask entries only match
    /// hosts given as IP literals.
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim().to_ascii_lowercase();

        if self.hosts.contains(&host) {
            return true;
        }
        if self.domains.iter().any(|d| host.ends_with(d.as_str())) {
            return true;
        }
        match IpLiteral::parse(&host) {
            Some(ip) => self.subnets.iter().any(|s| s.contains(ip)),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.domains.is_empty() && self.subnets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.domains.len() + self.subnets.len()
    }
}
