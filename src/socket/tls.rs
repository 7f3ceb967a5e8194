//! Pluggable TLS.
//!
//! The engine never performs a handshake itself. An `https` Connection
//! hands its freshly connected (or tunnelled) socket to the configured
//! [`TlsConnector`] and speaks HTTP over whatever socket comes back.

use crate::socket::connectjob::Connecting;
use crate::socket::stream::BoxedSocket;
use std::fmt;

/// Wraps a connected socket in a TLS session for `domain`.
pub trait TlsConnector: Send + Sync + fmt::Debug {
    fn connect(&self, domain: String, socket: BoxedSocket) -> Connecting;
}
