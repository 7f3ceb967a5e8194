//! Persistent HTTP/1.x connections.
//!
//! A [`Connection`] names one endpoint (scheme, host, port, optional proxy)
//! and carries what has been learned about it across requests: the server's
//! protocol version, whether it keeps sockets alive, and the socket session
//! new requests are pipelined onto.
//!
//! - [`state`]: protocol-version and keep-alive knowledge
//! - `send`: the per-request send algorithm
//! - `tunnel`: CONNECT negotiation for `https` through a proxy

mod send;
pub mod state;
mod tunnel;

pub use state::ProtocolInfo;

use crate::base::loadstate::{LoadState, SessionState};
use crate::base::neterror::NetError;
use crate::client::ClientConfig;
use crate::http::headers::Headers;
use crate::http::module::{run_request_handlers, Dispatch, Module};
use crate::http::request::{AbortHandle, Request};
use crate::http::response::Response;
use crate::socket::connectjob::ConnectJob;
use crate::socket::demux::StreamDemultiplexor;
use crate::socket::proxy::{ProxyAddr, ProxyConfig, DEFAULT_PROXY_PORT};
use crate::socket::tls::TlsConnector;
use send::SendState;
use state::SharedProto;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

/// Supported URL schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl FromStr for Scheme {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(NetError::UnknownUrlScheme)
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a Connection is built from.
pub(crate) struct ConnectionParts {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub config: Arc<ClientConfig>,
    pub connect_job: ConnectJob,
    pub tls: Option<Arc<dyn TlsConnector>>,
    pub proxy: Option<ProxyConfig>,
    pub modules: Vec<Arc<dyn Module>>,
    pub local_addr: Option<SocketAddr>,
}

#[derive(Default)]
struct Tracked {
    next_id: u64,
    requests: HashMap<u64, AbortHandle>,
    demuxes: Vec<Weak<StreamDemultiplexor>>,
}

pub(crate) struct ConnectionInner {
    scheme: Scheme,
    host: String,
    port: u16,
    local_addr: Option<SocketAddr>,
    config: Arc<ClientConfig>,
    connect_job: ConnectJob,
    tls: Option<Arc<dyn TlsConnector>>,
    proxy: RwLock<Option<ProxyConfig>>,
    proto: SharedProto,
    send: tokio::sync::Mutex<SendState>,
    /// Set while a streamed body is being written.
    output_finished: Arc<watch::Sender<bool>>,
    last_session: Mutex<Option<Arc<StreamDemultiplexor>>>,
    timeout: Mutex<Option<Duration>>,
    default_headers: Mutex<Headers>,
    modules: RwLock<Vec<Arc<dyn Module>>>,
    tracked: Mutex<Tracked>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConnectionInner {
    fn proxy(&self) -> Option<ProxyConfig> {
        self.proxy.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.modules.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn default_headers(&self) -> Headers {
        lock(&self.default_headers).clone()
    }

    fn track_demux(&self, demux: &Arc<StreamDemultiplexor>) {
        let mut tracked = lock(&self.tracked);
        tracked
            .demuxes
            .retain(|d| d.upgrade().is_some_and(|d| d.state() != SessionState::Closed));
        tracked.demuxes.push(Arc::downgrade(demux));
        drop(tracked);
        *lock(&self.last_session) = Some(demux.clone());
    }

    async fn send_tracked(&self, req: &mut Request, timeout: Option<Duration>) -> Result<Response, NetError> {
        let _guard = TrackGuard::new(self, req.abort_handle());
        let response = self.send_request(req, timeout).await?;
        if req.is_aborted() {
            return Err(NetError::Aborted);
        }
        Ok(response)
    }
}

/// Keeps a request visible to [`Connection::abort`] while it is being sent.
struct TrackGuard<'a> {
    inner: &'a ConnectionInner,
    id: u64,
}

impl<'a> TrackGuard<'a> {
    fn new(inner: &'a ConnectionInner, handle: AbortHandle) -> Self {
        let mut tracked = lock(&inner.tracked);
        tracked.next_id += 1;
        let id = tracked.next_id;
        tracked.requests.insert(id, handle);
        Self { inner, id }
    }
}

impl Drop for TrackGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.tracked).requests.remove(&self.id);
    }
}

/// A persistent connection to one HTTP endpoint.
///
/// Cheap to clone; clones share sockets and negotiated state. Many tasks may
/// send on the same Connection at once; requests are pipelined on a shared
/// socket whenever the server is known to allow it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(parts: ConnectionParts) -> Self {
        let mut defaults = Headers::new();
        if parts.config.disable_keep_alives {
            // "close" is a valid header value.
            let _ = defaults.insert("Connection", "close");
        }
        let timeout = (parts.config.timeout_ms > 0).then(|| Duration::from_millis(parts.config.timeout_ms));
        let (finished, _) = watch::channel(true);
        Self {
            inner: Arc::new(ConnectionInner {
                scheme: parts.scheme,
                host: parts.host.trim().to_ascii_lowercase(),
                port: parts.port,
                local_addr: parts.local_addr,
                proto: SharedProto::new(parts.config.force_http_1_0),
                config: parts.config,
                connect_job: parts.connect_job,
                tls: parts.tls,
                proxy: RwLock::new(parts.proxy),
                send: tokio::sync::Mutex::new(SendState::default()),
                output_finished: Arc::new(finished),
                last_session: Mutex::new(None),
                timeout: Mutex::new(timeout),
                default_headers: Mutex::new(defaults),
                modules: RwLock::new(parts.modules),
                tracked: Mutex::new(Tracked::default()),
            }),
        }
    }

    /// Send `req` with the connection's timeout.
    pub async fn send(&self, req: Request) -> Result<Response, NetError> {
        let timeout = self.timeout();
        self.send_with_timeout(req, timeout).await
    }

    /// Send `req`, bounding socket establishment and the wait for the
    /// response head by `timeout`.
    ///
    /// The request first runs through the module pipeline, which may answer
    /// it directly or move it to another connection.
    pub async fn send_with_timeout(
        &self,
        mut req: Request,
        timeout: Option<Duration>,
    ) -> Result<Response, NetError> {
        let mut conn = self.clone();
        let mut run_modules = true;
        let mut switches = 0;
        loop {
            if run_modules {
                let modules = conn.modules();
                let max_restarts = conn.inner.config.max_module_restarts;
                match run_request_handlers(&modules, &mut req, max_restarts)? {
                    Dispatch::Send => {}
                    Dispatch::Respond(response) => return Ok(response),
                    Dispatch::Switch { connection, restart } => {
                        switches += 1;
                        if switches > max_restarts {
                            return Err(NetError::TooManyModuleRestarts);
                        }
                        tracing::debug!(from = %conn, to = %connection, restart, "request moved to another connection");
                        conn = connection;
                        run_modules = restart;
                        continue;
                    }
                }
            }
            return conn.inner.send_tracked(&mut req, timeout).await;
        }
    }

    /// Abort every request currently being sent and every socket this
    /// connection opened.
    pub fn abort(&self) {
        let tracked = lock(&self.inner.tracked);
        tracing::debug!(
            connection = %self,
            requests = tracked.requests.len(),
            "aborting connection"
        );
        for handle in tracked.requests.values() {
            handle.abort();
        }
        for demux in tracked.demuxes.iter().filter_map(Weak::upgrade) {
            demux.abort();
        }
    }

    /// Switch to another proxy (or to going direct with `None`). The new
    /// peer may speak another protocol version, so everything learned so far
    /// is forgotten and the current socket is abandoned.
    pub async fn set_current_proxy(&self, proxy: Option<ProxyAddr>) {
        let mut state = self.inner.send.lock().await;
        let proxy = proxy.filter(|p| !p.host.trim().is_empty()).map(|p| {
            let host = p.host.trim().to_ascii_lowercase();
            let port = if p.port == 0 { DEFAULT_PROXY_PORT } else { p.port };
            match &self.inner.config.proxy {
                Some(cfg) if cfg.host.eq_ignore_ascii_case(&host) && cfg.port == port => cfg.clone(),
                _ => ProxyConfig::new(host, port),
            }
        });
        tracing::debug!(connection = %self, proxy = ?proxy.as_ref().map(ProxyConfig::addr), "proxy changed");
        *self.inner.proxy.write().unwrap_or_else(|e| e.into_inner()) = proxy;
        self.inner
            .proto
            .lock()
            .renegotiate(self.inner.config.force_http_1_0);
        state.clear();
        *lock(&self.inner.last_session) = None;
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *lock(&self.inner.timeout) = timeout.filter(|t| !t.is_zero());
    }

    pub fn timeout(&self) -> Option<Duration> {
        *lock(&self.inner.timeout)
    }

    /// Headers sent with every request unless the request sets its own.
    pub fn set_default_headers(&self, headers: Headers) {
        *lock(&self.inner.default_headers) = headers.without("Content-Length");
    }

    pub fn default_headers(&self) -> Headers {
        self.inner.default_headers()
    }

    pub fn add_module(&self, module: Arc<dyn Module>) {
        let mut modules = self.inner.modules.write().unwrap_or_else(|e| e.into_inner());
        if !modules.iter().any(|m| same_module(m, &module)) {
            modules.push(module);
        }
    }

    /// Returns whether `module` was installed.
    pub fn remove_module(&self, module: &Arc<dyn Module>) -> bool {
        let mut modules = self.inner.modules.write().unwrap_or_else(|e| e.into_inner());
        let before = modules.len();
        modules.retain(|m| !same_module(m, module));
        modules.len() != before
    }

    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        self.inner.modules()
    }

    pub fn protocol(&self) -> Scheme {
        self.inner.scheme
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn proxy_host(&self) -> Option<String> {
        self.inner.proxy().map(|p| p.host)
    }

    pub fn proxy_port(&self) -> Option<u16> {
        self.inner.proxy().map(|p| p.port)
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    pub fn protocol_info(&self) -> ProtocolInfo {
        self.inner.proto.lock().info()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.proto.lock().load_state()
    }

    /// State of the most recently opened socket session.
    pub fn session_state(&self) -> SessionState {
        lock(&self.inner.last_session)
            .as_ref()
            .map_or(SessionState::None, |demux| demux.state())
    }

    /// Whether `url` can be requested on this connection: same scheme, host
    /// and (defaulted) port.
    pub fn is_compatible_with(&self, url: &Url) -> bool {
        let Ok(scheme) = url.scheme().parse::<Scheme>() else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        scheme == self.inner.scheme
            && host.eq_ignore_ascii_case(&self.inner.host)
            && url.port_or_known_default() == Some(self.inner.port)
    }
}

fn same_module(a: &Arc<dyn Module>, b: &Arc<dyn Module>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = &self.inner;
        write!(f, "{}://", inner.scheme)?;
        if inner.host.contains(':') {
            write!(f, "[{}]", inner.host)?;
        } else {
            f.write_str(&inner.host)?;
        }
        if inner.port != inner.scheme.default_port() {
            write!(f, ":{}", inner.port)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.to_string())
            .field("proxy", &self.inner.proxy().map(|p| p.addr()))
            .finish_non_exhaustive()
    }
}
