//! Polymorphic transport sockets.
//!
//! Every transport the engine talks over (plain TCP, a SOCKS tunnel, a TLS
//! session from a pluggable connector, an in-memory pipe) is handled through
//! the [`StreamSocket`] trait and carried around as a [`BoxedSocket`].

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any byte stream the engine can talk over.
///
/// TCP streams, TLS streams and in-memory duplex pipes all qualify. Whether
/// the peer is still there is learned by reading, see
/// [`StreamDemultiplexor::peer_closed`](crate::socket::demux::StreamDemultiplexor::peer_closed).
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

impl<T> StreamSocket for T where T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

/// A boxed, object-safe [`StreamSocket`].
pub struct BoxedSocket {
    inner: Pin<Box<dyn StreamSocket>>,
}

impl BoxedSocket {
    /// Create a new BoxedSocket from any StreamSocket.
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::pin(socket),
        }
    }
}

impl fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedSocket").finish_non_exhaustive()
    }
}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}
