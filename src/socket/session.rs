//! A live socket: write half plus the demultiplexor over its read half.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::demux::StreamDemultiplexor;
use crate::socket::stream::BoxedSocket;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{watch, Mutex};

/// Shared write access to a socket.
///
/// Request headers and bodies go through here; only one write runs at a
/// time, and all of them fail as soon as the session is aborted.
pub struct SocketWriter {
    half: Mutex<WriteHalf<BoxedSocket>>,
    abort: watch::Receiver<Option<NetError>>,
    host: String,
}

impl SocketWriter {
    async fn guarded<F>(&self, op: F) -> Result<(), NetError>
    where
        F: Future<Output = io::Result<()>>,
    {
        let mut abort = self.abort.clone();
        if let Some(err) = *abort.borrow() {
            return Err(err);
        }
        tokio::select! {
            r = op => r.transfer_context(&self.host),
            changed = abort.changed() => match changed {
                Ok(()) => Err((*abort.borrow()).unwrap_or(NetError::ConnectionAborted)),
                Err(_) => Err(NetError::ConnectionAborted),
            },
        }
    }

    /// Write and flush `data`.
    pub async fn write_all(&self, data: &[u8]) -> Result<(), NetError> {
        let mut half = self.half.lock().await;
        self.guarded(async {
            half.write_all(data).await?;
            half.flush().await
        })
        .await
    }

    /// Write several buffers back to back under one lock, then flush.
    pub async fn write_parts(&self, parts: &[&[u8]]) -> Result<(), NetError> {
        let mut half = self.half.lock().await;
        self.guarded(async {
            for part in parts {
                half.write_all(part).await?;
            }
            half.flush().await
        })
        .await
    }

    pub async fn flush(&self) -> Result<(), NetError> {
        let mut half = self.half.lock().await;
        self.guarded(half.flush()).await
    }
}

/// A socket session: born when a request needs a socket and none is
/// reusable, dead once its demultiplexor closes.
#[derive(Clone)]
pub struct SocketSession {
    pub demux: Arc<StreamDemultiplexor>,
    pub writer: Arc<SocketWriter>,
}

impl SocketSession {
    pub fn new(socket: BoxedSocket, host: &str, idle_timeout: Duration) -> Self {
        let (read, write) = tokio::io::split(socket);
        let demux = StreamDemultiplexor::new(read, idle_timeout);
        let writer = Arc::new(SocketWriter {
            half: Mutex::new(write),
            abort: demux.abort_signal(),
            host: host.to_string(),
        });
        tracing::debug!(host = %host, demux = demux.id(), "socket session opened");
        Self { demux, writer }
    }

    pub fn is_reusable(&self) -> bool {
        self.demux.is_reusable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_parts_are_contiguous() {
        let (client, mut server) = tokio::io::duplex(1024);
        let session = SocketSession::new(BoxedSocket::new(client), "test", Duration::from_secs(60));

        session
            .writer
            .write_parts(&[b"GET / HTTP/1.1\r\n", b"\r\n"])
            .await
            .unwrap();
        let mut buf = [0u8; 18];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET / HTTP/1.1\r\n\r\n");
    }

    #[tokio::test]
    async fn test_writes_fail_after_abort() {
        let (client, _server) = tokio::io::duplex(1024);
        let session = SocketSession::new(BoxedSocket::new(client), "test", Duration::from_secs(60));

        session.demux.abort();
        assert_eq!(
            session.writer.write_all(b"data").await.err(),
            Some(NetError::ConnectionAborted)
        );
    }
}
