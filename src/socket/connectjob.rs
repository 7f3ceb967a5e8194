//! Socket acquisition: DNS, then TCP, bounded by an optional timeout.
//!
//! Establishment with a timeout runs on a spawned task. When the caller
//! gives up the task is left to finish, and a socket it opens afterwards
//! is closed instead of being handed to anyone.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::dns::{Name, Resolve};
use crate::socket::stream::BoxedSocket;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::oneshot;

/// Future returned by a [`SocketConnector`].
pub type Connecting = Pin<Box<dyn Future<Output = Result<BoxedSocket, NetError>> + Send>>;

/// Produces a connected socket for a host and port.
///
/// The default is [`DirectConnector`]. [`SocksConnector`](super::socks::SocksConnector)
/// wraps another connector and leaves the target's resolution to the
/// SOCKS server.
pub trait SocketConnector: Send + Sync + fmt::Debug {
    fn connect(&self, host: String, port: u16) -> Connecting;
}

/// Resolves the host and tries each address in order.
#[derive(Clone)]
pub struct DirectConnector {
    resolver: Arc<dyn Resolve>,
    local_addr: Option<SocketAddr>,
}

impl DirectConnector {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        Self {
            resolver,
            local_addr: None,
        }
    }

    /// Bind outgoing sockets to a local address (port 0 for any port).
    pub fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    async fn connect_addr(
        local: Option<SocketAddr>,
        addr: SocketAddr,
    ) -> std::io::Result<TcpStream> {
        match local {
            None => TcpStream::connect(addr).await,
            Some(local) => {
                let socket = match addr.ip() {
                    IpAddr::V4(_) => TcpSocket::new_v4()?,
                    IpAddr::V6(_) => TcpSocket::new_v6()?,
                };
                socket.bind(local)?;
                socket.connect(addr).await
            }
        }
    }
}

impl fmt::Debug for DirectConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectConnector")
            .field("resolver", &self.resolver)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

impl SocketConnector for DirectConnector {
    fn connect(&self, host: String, port: u16) -> Connecting {
        let resolver = self.resolver.clone();
        let local = self.local_addr;
        Box::pin(async move {
            let addrs = resolver.resolve(Name::new(host.as_str())).await?;

            let mut last_err = NetError::NameNotResolved;
            for ip in addrs {
                let addr = SocketAddr::new(ip, port);
                tracing::debug!(host = %host, addr = %addr, "connecting");
                match Self::connect_addr(local, addr)
                    .await
                    .connection_context(&host, port)
                {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        return Ok(BoxedSocket::new(stream));
                    }
                    Err(e) => last_err = e,
                }
            }
            Err(last_err)
        })
    }
}

/// One socket acquisition.
///
/// Bounded by the caller's timeout; a socket that arrives late is closed.
pub struct ConnectJob {
    connector: Arc<dyn SocketConnector>,
}

impl ConnectJob {
    pub fn new(connector: Arc<dyn SocketConnector>) -> Self {
        Self { connector }
    }

    /// Connect to `host:port`.
    ///
    /// Without a timeout the connect runs inline. With one, it runs on a
    /// background task and the caller waits at most `timeout`; the error is
    /// then [`NetError::ConnectionTimedOut`].
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<BoxedSocket, NetError> {
        let connecting = self.connector.connect(host.to_string(), port);

        let timeout = match timeout {
            Some(t) if !t.is_zero() => t,
            _ => return connecting.await,
        };

        let (tx, rx) = oneshot::channel();
        let target = format!("{}:{}", host, port);
        tokio::spawn(async move {
            let result = connecting.await;
            if let Err(Ok(late)) = tx.send(result) {
                tracing::warn!(target = %target, "connect completed after timeout, closing socket");
                drop(late);
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetError::ConnectionFailed),
            Err(_) => {
                tracing::debug!(host = %host, port, ?timeout, "connection establishment timed out");
                Err(NetError::ConnectionTimedOut)
            }
        }
    }
}
