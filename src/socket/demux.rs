//! Stream demultiplexing for pipelined responses.
//!
//! One socket's inbound bytes are shared by every response pipelined on it.
//! The read half is wrapped in a [`Turn`]: whoever holds the turn may read,
//! and responses receive it strictly in the order they were registered.
//! A response that finishes hands the turn to the next registration; the
//! last one parks it in the demultiplexor until someone else registers.

use crate::base::loadstate::SessionState;
use crate::base::neterror::NetError;
use crate::socket::stream::BoxedSocket;
use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 8 * 1024;
const MAX_LINE: usize = 16 * 1024;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Exclusive right to read from a socket.
pub struct Turn {
    reader: ReadHalf<BoxedSocket>,
    pub(crate) buf: BytesMut,
    abort: Option<watch::Receiver<Option<NetError>>>,
    eof: bool,
    seq: u64,
}

impl Turn {
    /// A turn over a socket that no demultiplexor manages (CONNECT).
    pub(crate) fn detached(reader: ReadHalf<BoxedSocket>) -> Self {
        Self {
            reader,
            buf: BytesMut::new(),
            abort: None,
            eof: false,
            seq: 0,
        }
    }

    pub(crate) fn into_parts(self) -> (ReadHalf<BoxedSocket>, BytesMut) {
        (self.reader, self.buf)
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Read more bytes into the buffer. Returns 0 at end of stream.
    ///
    /// Cancel safe: bytes already read stay in the buffer.
    pub async fn fill(&mut self) -> Result<usize, NetError> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK);

        let read = loop {
            let Some(abort) = self.abort.as_mut() else {
                break self.reader.read_buf(&mut self.buf).await;
            };
            if let Some(err) = *abort.borrow() {
                return Err(err);
            }
            let sender_gone = tokio::select! {
                r = self.reader.read_buf(&mut self.buf) => break r,
                changed = abort.changed() => changed.is_err(),
            };
            if sender_gone {
                self.abort = None;
            }
        };
        let n = read.map_err(NetError::from)?;

        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub async fn read_line(&mut self) -> Result<Option<BytesMut>, NetError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(scanned + pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }
            scanned = self.buf.len();
            if scanned > MAX_LINE {
                return Err(NetError::ResponseHeadersTooBig);
            }
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }
}

/// A response's place in the read queue.
pub struct Ticket {
    pub(crate) seq: u64,
    pub(crate) rx: oneshot::Receiver<Result<Turn, NetError>>,
}

/// A registered response that can be forced to buffer its remaining bytes
/// so that responses queued behind it can proceed.
pub trait QueuedExchange: Send + Sync {
    fn buffer_remaining(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

struct DemuxInner {
    next_seq: u64,
    idle: Option<Turn>,
    waiting: VecDeque<(u64, oneshot::Sender<Result<Turn, NetError>>)>,
    registered: VecDeque<(u64, Weak<dyn QueuedExchange>)>,
    closing: bool,
    closed: bool,
    failure: Option<NetError>,
}

/// Serializes reads of one socket among pipelined responses.
pub struct StreamDemultiplexor {
    id: u64,
    inner: Mutex<DemuxInner>,
    abort_tx: watch::Sender<Option<NetError>>,
    idle_timeout: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl StreamDemultiplexor {
    pub fn new(reader: ReadHalf<BoxedSocket>, idle_timeout: Duration) -> Arc<Self> {
        let (abort_tx, abort_rx) = watch::channel(None);
        let turn = Turn {
            reader,
            buf: BytesMut::new(),
            abort: Some(abort_rx),
            eof: false,
            seq: 0,
        };
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(DemuxInner {
                next_seq: 1,
                idle: Some(turn),
                waiting: VecDeque::new(),
                registered: VecDeque::new(),
                closing: false,
                closed: false,
                failure: None,
            }),
            abort_tx,
            idle_timeout,
            timer: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, DemuxInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Signals socket writers that this session has failed.
    pub fn abort_signal(&self) -> watch::Receiver<Option<NetError>> {
        self.abort_tx.subscribe()
    }

    /// Queue a response. The returned ticket resolves to the turn once
    /// every earlier registration has finished reading.
    pub fn register(&self, exchange: Weak<dyn QueuedExchange>) -> Result<Ticket, NetError> {
        let mut inner = self.lock();
        if let Some(err) = inner.failure {
            return Err(err);
        }
        if inner.closing || inner.closed {
            return Err(NetError::ConnectionClosed);
        }
        self.cancel_timer();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.registered.push_back((seq, exchange));

        let (tx, rx) = oneshot::channel();
        match inner.idle.take() {
            Some(mut turn) => {
                turn.seq = seq;
                let _ = tx.send(Ok(turn));
            }
            None => inner.waiting.push_back((seq, tx)),
        }
        Ok(Ticket { seq, rx })
    }

    /// Registrations queued ahead of `seq` that are still alive.
    pub fn predecessors(&self, seq: u64) -> Vec<Arc<dyn QueuedExchange>> {
        self.lock()
            .registered
            .iter()
            .take_while(|(s, _)| *s < seq)
            .filter_map(|(_, ex)| ex.upgrade())
            .collect()
    }

    /// Return the turn after a response has been read completely.
    pub fn release(self: &Arc<Self>, turn: Turn) {
        let mut inner = self.lock();
        let seq = turn.seq;
        inner.registered.retain(|(s, _)| *s != seq);

        if inner.failure.is_some() {
            return;
        }
        if turn.eof {
            tracing::debug!(demux = self.id, "peer closed the connection");
            Self::fail_locked(&mut inner, &self.abort_tx, NetError::ConnectionClosed);
            return;
        }

        match inner.waiting.pop_front() {
            Some((next, tx)) => {
                let mut turn = turn;
                turn.seq = next;
                if tx.send(Ok(turn)).is_err() {
                    // Nobody can consume the next response's bytes.
                    Self::fail_locked(&mut inner, &self.abort_tx, NetError::ConnectionAborted);
                }
            }
            None if inner.closing => {
                tracing::debug!(demux = self.id, "drained, closing");
                inner.closed = true;
                drop(turn);
            }
            None => {
                inner.idle = Some(turn);
                drop(inner);
                self.restart_timer();
            }
        }
    }

    fn fail_locked(
        inner: &mut DemuxInner,
        abort_tx: &watch::Sender<Option<NetError>>,
        err: NetError,
    ) {
        if inner.failure.is_some() {
            return;
        }
        inner.failure = Some(err);
        inner.closed = true;
        inner.idle = None;
        inner.registered.clear();
        for (_, tx) in inner.waiting.drain(..) {
            let _ = tx.send(Err(err));
        }
        abort_tx.send_replace(Some(err));
    }

    /// Close with `err`, failing every waiting response.
    pub fn fail(&self, err: NetError) {
        let mut inner = self.lock();
        if inner.failure.is_none() {
            tracing::debug!(demux = self.id, error = %err, "closing demultiplexor");
        }
        Self::fail_locked(&mut inner, &self.abort_tx, err);
        drop(inner);
        self.cancel_timer();
    }

    /// Hard abort: outstanding reads and writes fail immediately.
    pub fn abort(&self) {
        self.fail(NetError::ConnectionAborted);
    }

    /// Stop accepting registrations; close once the queue drains.
    pub fn mark_for_close(&self) {
        let mut inner = self.lock();
        if inner.closing {
            return;
        }
        inner.closing = true;
        if inner.registered.is_empty() {
            inner.closed = true;
            inner.idle = None;
        }
        drop(inner);
        self.cancel_timer();
    }

    /// Whether new requests may be sent on this socket.
    pub fn is_reusable(&self) -> bool {
        let inner = self.lock();
        !inner.closing && !inner.closed && inner.failure.is_none()
    }

    pub fn state(&self) -> SessionState {
        let inner = self.lock();
        if inner.closed || inner.failure.is_some() {
            SessionState::Closed
        } else if inner.closing {
            SessionState::Draining
        } else {
            SessionState::Open
        }
    }

    pub fn outstanding(&self) -> usize {
        self.lock().registered.len()
    }

    /// Bytes readable without blocking. Only the parked turn is read;
    /// while a response is reading this reports 0. End of stream counts as
    /// readable so the caller notices the peer gave up.
    pub fn available(&self) -> usize {
        let mut inner = self.lock();
        let Some(turn) = inner.idle.as_mut() else {
            return 0;
        };
        if !turn.buf.is_empty() {
            return turn.buf.len();
        }
        if turn.eof {
            return 1;
        }
        turn.buf.reserve(READ_CHUNK);
        match turn.reader.read_buf(&mut turn.buf).now_or_never() {
            Some(Ok(0)) => {
                turn.eof = true;
                1
            }
            Some(Ok(n)) => n,
            Some(Err(_)) => {
                turn.eof = true;
                1
            }
            None => 0,
        }
    }

    /// Whether the peer closed the socket while it sat idle. Bytes that
    /// arrived unprompted stay buffered for the next response.
    pub fn peer_closed(&self) -> bool {
        self.available();
        self.lock().idle.as_ref().is_some_and(|turn| turn.eof)
    }

    /// (Re)arm the keep-alive idle timer. When it fires with nothing queued,
    /// the socket is closed.
    pub fn restart_timer(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let timeout = self.idle_timeout;
        let task = handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(demux) = weak.upgrade() {
                demux.idle_expired();
            }
        });
        let old = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(old) = old {
            old.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some(task) = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    fn idle_expired(&self) {
        let mut inner = self.lock();
        if inner.registered.is_empty() && !inner.closed {
            tracing::debug!(demux = self.id, "keep-alive idle timeout, closing");
            inner.closing = true;
            inner.closed = true;
            inner.idle = None;
        }
    }
}

impl Drop for StreamDemultiplexor {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
