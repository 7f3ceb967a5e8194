//! Request bodies: none, a byte payload, or a stream written by the caller.

use crate::base::neterror::NetError;
use crate::socket::demux::StreamDemultiplexor;
use crate::socket::session::SocketWriter;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Request body for methods that send data.
#[derive(Default)]
pub enum RequestBody {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// Body with raw bytes.
    Bytes(Bytes),
    /// Body produced by a [`BodyWriter`] after the headers are on the wire.
    Stream(StreamBody),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RequestBody::Stream(s) => f.debug_tuple("Stream").field(&s.length).finish(),
        }
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Bytes(Bytes::from(s))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(v))
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Bytes(Bytes::from(s.to_owned()))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        RequestBody::Bytes(b)
    }
}

impl RequestBody {
    /// A streamed body and the writer that produces it. `length` is the
    /// declared size, or `None` when unknown (sent chunked when possible).
    pub fn channel(length: Option<u64>) -> (RequestBody, BodyWriter) {
        let (tx, rx) = oneshot::channel();
        let body = RequestBody::Stream(StreamBody {
            length,
            link: Some(tx),
        });
        let writer = BodyWriter {
            link: Some(rx),
            sink: None,
            length,
            written: 0,
            buffer: BytesMut::new(),
            finished: false,
        };
        (body, writer)
    }

    /// Check if there is no body at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Whether a payload of any kind is present (a zero-length byte payload
    /// still counts).
    pub fn is_present(&self) -> bool {
        !self.is_empty()
    }

    /// Payload size when known up front.
    pub fn len(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(b) => Some(b.len() as u64),
            RequestBody::Stream(s) => s.length,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }
}

/// The sending half of a streamed body, held by the request.
pub struct StreamBody {
    length: Option<u64>,
    link: Option<oneshot::Sender<BodySink>>,
}

impl StreamBody {
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Hand the body's destination to the writer. Fails if the writer is gone
    /// or the stream was already linked.
    pub(crate) fn link(&mut self, sink: BodySink) -> Result<(), NetError> {
        let tx = self.link.take().ok_or(NetError::BodyAlreadyConsumed)?;
        tx.send(sink).map_err(|_| NetError::ConnectionAborted)
    }
}

/// Where a [`BodyWriter`]'s bytes go.
pub(crate) enum BodySink {
    /// Straight onto the socket, after the request headers.
    Socket {
        writer: Arc<SocketWriter>,
        chunked: bool,
        finished: Arc<watch::Sender<bool>>,
        demux: Arc<StreamDemultiplexor>,
    },
    /// Into memory, when the body must be sent with a computed length.
    Buffer(oneshot::Sender<Bytes>),
}

/// Writes a streamed request body.
///
/// Writes wait until the request has been sent and its socket is free. Call
/// [`finish`](BodyWriter::finish) when done; dropping an unfinished writer
/// aborts the socket, since the request on the wire is incomplete.
pub struct BodyWriter {
    link: Option<oneshot::Receiver<BodySink>>,
    sink: Option<BodySink>,
    length: Option<u64>,
    written: u64,
    buffer: BytesMut,
    finished: bool,
}

impl BodyWriter {
    async fn sink(&mut self) -> Result<&mut BodySink, NetError> {
        if self.sink.is_none() {
            let link = self.link.take().ok_or(NetError::ConnectionAborted)?;
            let sink = link.await.map_err(|_| NetError::ConnectionAborted)?;
            self.sink = Some(sink);
        }
        self.sink.as_mut().ok_or(NetError::ConnectionAborted)
    }

    /// Write `data` as (part of) the body.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), NetError> {
        if self.finished {
            return Err(NetError::BodyAlreadyConsumed);
        }
        self.written += data.len() as u64;
        if matches!(self.length, Some(limit) if self.written > limit) {
            return Err(NetError::ContentLengthMismatch);
        }
        if data.is_empty() {
            return Ok(());
        }
        match self.sink().await? {
            BodySink::Socket {
                writer,
                chunked: true,
                ..
            } => {
                let size = format!("{:x}\r\n", data.len());
                writer
                    .write_parts(&[size.as_bytes(), data, &b"\r\n"[..]])
                    .await
            }
            BodySink::Socket { writer, .. } => writer.write_all(data).await,
            BodySink::Buffer(_) => {
                self.buffer.extend_from_slice(data);
                Ok(())
            }
        }
    }

    /// Complete the body.
    pub async fn finish(mut self) -> Result<(), NetError> {
        let short = matches!(self.length, Some(limit) if self.written != limit);
        let sink = self.sink().await?;
        let result = match sink {
            BodySink::Socket { demux, .. } if short => {
                demux.fail(NetError::ContentLengthMismatch);
                Err(NetError::ContentLengthMismatch)
            }
            BodySink::Socket {
                writer,
                chunked: true,
                ..
            } => writer.write_all(b"0\r\n\r\n").await,
            BodySink::Socket { .. } => Ok(()),
            BodySink::Buffer(_) if short => Err(NetError::ContentLengthMismatch),
            BodySink::Buffer(_) => match self.sink.take() {
                Some(BodySink::Buffer(tx)) => tx
                    .send(self.buffer.split().freeze())
                    .map_err(|_| NetError::ConnectionAborted),
                _ => Ok(()),
            },
        };
        self.finished = true;
        self.signal_finished();
        result
    }

    fn signal_finished(&self) {
        if let Some(BodySink::Socket { finished, .. }) = &self.sink {
            finished.send_replace(true);
        }
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(BodySink::Socket { demux, .. }) = &self.sink {
            tracing::debug!(demux = demux.id(), "body writer dropped mid-body");
            demux.fail(NetError::ConnectionAborted);
        }
        self.signal_finished();
    }
}
