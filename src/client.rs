//! Client configuration and the Connection factory.
//!
//! # Example
//!
//! ```rust,ignore
//! use pipenet::{Client, ClientConfig, http::Request};
//!
//! let client = Client::builder()
//!     .config(ClientConfig::from_env()?)
//!     .build()?;
//!
//! let conn = client.connect_url(&"http://example.com/".parse()?)?;
//! let resp = conn.send(Request::get("/")).await?;
//! println!("{}", resp.text().await?);
//! ```

use crate::base::neterror::NetError;
use crate::connection::{Connection, ConnectionParts, Scheme};
use crate::dns::{GaiResolver, Resolve};
use crate::http::module::Module;
use crate::socket::connectjob::{ConnectJob, DirectConnector, SocketConnector};
use crate::socket::matcher::NonProxyList;
use crate::socket::proxy::{ProxyAddr, ProxyConfig, SocksConfig, DEFAULT_PROXY_PORT};
use crate::socket::socks::SocksConnector;
use crate::socket::tls::TlsConnector;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use url::Url;

/// Process-wide defaults, handed to every Connection a [`Client`] creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub proxy: Option<ProxyConfig>,
    /// Hosts, `.domain` suffixes and `ip/mask` subnets reached directly.
    pub non_proxy_hosts: Vec<String>,
    /// Open every socket, proxy sockets included, through this SOCKS server.
    pub socks: Option<SocksConfig>,
    /// Never pipeline a request behind an outstanding response.
    pub never_pipeline: bool,
    /// Ask servers to close after each response.
    pub disable_keep_alives: bool,
    pub force_http_1_0: bool,
    /// Buffer streamed bodies of unknown length instead of chunking them.
    pub dont_chunk_requests: bool,
    /// Honor [`Request::set_delay_entity`](crate::http::Request::set_delay_entity).
    pub delayed_entity_write: bool,
    /// Connect and response-head timeout; 0 disables it.
    pub timeout_ms: u64,
    pub keep_alive_idle_ms: u64,
    pub max_module_restarts: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            non_proxy_hosts: Vec::new(),
            socks: None,
            never_pipeline: false,
            disable_keep_alives: false,
            force_http_1_0: false,
            dont_chunk_requests: false,
            delayed_entity_write: false,
            timeout_ms: 0,
            keep_alive_idle_ms: 60_000,
            max_module_restarts: 100,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl ClientConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, NetError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NetError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |upper: &str, lower: Option<&str>| {
            lookup(upper)
                .or_else(|| lower.and_then(&lookup))
                .filter(|v| !v.trim().is_empty())
        };
        let mut config = Self::default();

        if let Some(proxy) = get("HTTP_PROXY", Some("http_proxy")) {
            let addr = ProxyAddr::parse(&proxy)?;
            let mut proxy_config = ProxyConfig::new(addr.host, addr.port);
            if let Ok(url) = Url::parse(proxy.trim()) {
                if !url.username().is_empty() {
                    proxy_config = proxy_config.with_auth(url.username(), url.password().unwrap_or(""));
                }
            }
            config.proxy = Some(proxy_config);
        }
        if let Some(list) = get("NO_PROXY", Some("no_proxy")) {
            config.non_proxy_hosts = list
                .split(['|', ','])
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(host) = get("PIPENET_SOCKS_HOST", None) {
            let port = match get("PIPENET_SOCKS_PORT", None) {
                Some(port) => port.trim().parse().map_err(|_| NetError::ProxyConfiguration)?,
                None => 0,
            };
            let mut socks = SocksConfig::new(host.trim(), port);
            if let Some(version) = get("PIPENET_SOCKS_VERSION", None) {
                socks.version = Some(version.trim().parse().map_err(|_| NetError::ProxyConfiguration)?);
            }
            config.socks = Some(socks);
        }
        config.never_pipeline = get("PIPENET_DISABLE_PIPELINING", None).is_some_and(|v| flag(&v));
        config.disable_keep_alives = get("PIPENET_DISABLE_KEEP_ALIVES", None).is_some_and(|v| flag(&v));
        config.force_http_1_0 = get("PIPENET_FORCE_HTTP_1_0", None).is_some_and(|v| flag(&v));
        config.dont_chunk_requests = get("PIPENET_DONT_CHUNK_REQUESTS", None).is_some_and(|v| flag(&v));
        if let Some(ms) = get("PIPENET_TIMEOUT_MS", None) {
            config.timeout_ms = ms.trim().parse().map_err(|_| NetError::ProxyConfiguration)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "invalid client configuration");
            NetError::JsonParseError
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "cannot read client configuration");
            NetError::from(e)
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(NetError::ProxyConfiguration);
            }
        }
        if let Some(socks) = &self.socks {
            socks.validate()?;
        }
        NonProxyList::parse(&self.non_proxy_hosts.join("|"))?;
        Ok(())
    }
}

/// Builder for a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    resolver: Option<Arc<dyn Resolve>>,
    connector: Option<Arc<dyn SocketConnector>>,
    tls: Option<Arc<dyn TlsConnector>>,
    modules: Vec<Arc<dyn Module>>,
    local_addr: Option<SocketAddr>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for the default direct connector.
    pub fn resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace socket establishment. With [`ClientConfig::socks`] set, this
    /// connector is only used to reach the SOCKS server.
    pub fn connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// TLS for `https` connections.
    pub fn tls(mut self, tls: Arc<dyn TlsConnector>) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Add a module to the default pipeline of every new Connection.
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Bind outgoing sockets to this local address. Applies to the built-in
    /// connector only; [`build`](Self::build) refuses it next to a custom
    /// [`connector`](Self::connector).
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn build(self) -> Result<Client, NetError> {
        self.config.validate()?;
        let connector: Arc<dyn SocketConnector> = match self.connector {
            Some(_) if self.local_addr.is_some() => {
                tracing::warn!("local address cannot be applied to a custom connector");
                return Err(NetError::InvalidConfiguration);
            }
            Some(connector) => connector,
            None => {
                let resolver = self
                    .resolver
                    .unwrap_or_else(|| Arc::new(GaiResolver::new()));
                let mut direct = DirectConnector::new(resolver);
                if let Some(addr) = self.local_addr {
                    direct = direct.with_local_addr(addr);
                }
                Arc::new(direct)
            }
        };
        let connector = match &self.config.socks {
            Some(socks) => {
                tracing::debug!(socks = %socks.host, port = socks.effective_port(), "connecting through SOCKS");
                Arc::new(SocksConnector::new(socks.clone(), connector))
            }
            None => connector,
        };
        let non_proxy = NonProxyList::parse(&self.config.non_proxy_hosts.join("|"))?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: Arc::new(self.config),
                connector,
                tls: self.tls,
                modules: self.modules,
                local_addr: self.local_addr,
                non_proxy: RwLock::new(non_proxy),
            }),
        })
    }
}

struct ClientInner {
    config: Arc<ClientConfig>,
    connector: Arc<dyn SocketConnector>,
    tls: Option<Arc<dyn TlsConnector>>,
    modules: Vec<Arc<dyn Module>>,
    local_addr: Option<SocketAddr>,
    non_proxy: RwLock<NonProxyList>,
}

/// Creates [`Connection`]s that share one configuration.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// A Connection to `host:port` (port 0 selects the scheme's default).
    pub fn connect(&self, scheme: Scheme, host: &str, port: u16) -> Connection {
        let port = if port == 0 { scheme.default_port() } else { port };
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        let proxy = self.proxy_for(host);
        tracing::debug!(
            scheme = %scheme,
            host = %host,
            port,
            proxy = ?proxy.as_ref().map(ProxyConfig::addr),
            "new connection"
        );
        Connection::new(ConnectionParts {
            scheme,
            host: host.to_string(),
            port,
            config: self.inner.config.clone(),
            connect_job: ConnectJob::new(self.inner.connector.clone()),
            tls: self.inner.tls.clone(),
            proxy,
            modules: self.inner.modules.clone(),
            local_addr: self.inner.local_addr,
        })
    }

    /// A Connection to the endpoint of `url`.
    pub fn connect_url(&self, url: &Url) -> Result<Connection, NetError> {
        let scheme: Scheme = url.scheme().parse()?;
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().unwrap_or(0);
        Ok(self.connect(scheme, host, port))
    }

    /// Reach hosts matching `entry` directly from now on.
    pub fn dont_proxy_for(&self, entry: &str) -> Result<(), NetError> {
        self.inner
            .non_proxy
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .dont_proxy_for(entry)
    }

    /// Undo [`dont_proxy_for`](Self::dont_proxy_for). Returns whether the
    /// entry was present.
    pub fn do_proxy_for(&self, entry: &str) -> Result<bool, NetError> {
        self.inner
            .non_proxy
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .do_proxy_for(entry)
    }

    /// The proxy a new Connection to `host` would use.
    pub fn proxy_for(&self, host: &str) -> Option<ProxyConfig> {
        let proxy = self.inner.config.proxy.as_ref()?;
        let bypass = self
            .inner
            .non_proxy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .matches(host);
        if bypass {
            return None;
        }
        let mut proxy = proxy.clone();
        proxy.host = proxy.host.trim().to_ascii_lowercase();
        if proxy.port == 0 {
            proxy.port = DEFAULT_PROXY_PORT;
        }
        Some(proxy)
    }
}
