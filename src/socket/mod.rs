//! Socket acquisition and per-socket plumbing.
//!
//! - [`connectjob`]: DNS → TCP with a supervised establishment timeout
//! - [`demux`]: FIFO hand-off of a socket's inbound bytes to pipelined responses
//! - [`session`]: a live socket (writer + demultiplexor)
//! - [`matcher`]: non-proxy host list
//! - [`proxy`]: HTTP proxy and SOCKS settings
//! - [`socks`]: SOCKS 4a/5 connector
//! - [`tls`]: pluggable TLS connector

pub mod connectjob;
pub mod demux;
pub mod matcher;
pub mod proxy;
pub mod session;
pub mod socks;
pub mod stream;
pub mod tls;

pub use connectjob::{ConnectJob, Connecting, DirectConnector, SocketConnector};
pub use matcher::NonProxyList;
pub use proxy::{ProxyAddr, ProxyConfig, SocksConfig};
pub use socks::SocksConnector;
pub use stream::{BoxedSocket, StreamSocket};
pub use tls::TlsConnector;
