//! Core DNS resolution types and traits.

use crate::base::neterror::NetError;
use std::{collections::HashMap, fmt, future::Future, net::IpAddr, pin::Pin, sync::Arc};

/// A domain name to resolve into IP addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Resolved addresses, in the order they should be tried.
pub type Addrs = Box<dyn Iterator<Item = IpAddr> + Send>;

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, NetError>> + Send>>;

/// Trait for DNS resolution.
///
/// Implementations must be thread-safe; a resolver is shared by every
/// Connection a [`Client`](crate::client::Client) creates.
pub trait Resolve: Send + Sync + fmt::Debug {
    /// Resolves a host name. An unknown host is reported as
    /// [`NetError::NameNotResolved`].
    fn resolve(&self, name: Name) -> Resolving;
}

impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: Name) -> Resolving {
        (**self).resolve(name)
    }
}

/// Resolver with a fixed host table, falling back to another resolver.
///
/// Hosts are matched case-insensitively.
pub struct StaticResolver {
    inner: Option<Arc<dyn Resolve>>,
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// A resolver that knows only the hosts added to it.
    pub fn new() -> Self {
        Self {
            inner: None,
            hosts: HashMap::new(),
        }
    }

    /// A resolver that consults `inner` for hosts not in its table.
    pub fn with_fallback(inner: Arc<dyn Resolve>) -> Self {
        Self {
            inner: Some(inner),
            hosts: HashMap::new(),
        }
    }

    /// Map `host` to `addrs`.
    pub fn host(mut self, host: &str, addrs: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.to_ascii_lowercase(), addrs);
        self
    }
}

impl Default for StaticResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for StaticResolver {
    fn resolve(&self, name: Name) -> Resolving {
        if let Some(addrs) = self.hosts.get(&name.as_str().to_ascii_lowercase()) {
            let addrs: Addrs = Box::new(addrs.clone().into_iter());
            return Box::pin(std::future::ready(Ok(addrs)));
        }
        match &self.inner {
            Some(inner) => inner.resolve(name),
            None => Box::pin(std::future::ready(Err(NetError::NameNotResolved))),
        }
    }
}

impl fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticResolver")
            .field("hosts", &self.hosts.len())
            .field("fallback", &self.inner.is_some())
            .finish()
    }
}
