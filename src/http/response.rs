//! Responses bound to a socket's demultiplexor.
//!
//! A [`Response`] is created as soon as its request is written. Nothing is
//! read until someone asks for the status, headers, or body; that read waits
//! for the socket turn, which arrives only after every earlier response on the
//! same socket has been consumed (or buffered).

use crate::base::neterror::NetError;
use crate::http::head::{fill_head, read_head, ResponseHead};
use crate::http::headers::has_token;
use crate::http::responsebody::{BodyDecoder, BodyFraming};
use crate::http::version::ProtocolVersion;
use crate::socket::demux::{QueuedExchange, StreamDemultiplexor, Ticket, Turn};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use http::StatusCode;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Notified once per final response head, before the body is read.
pub(crate) trait HeadObserver: Send + Sync {
    fn on_head(&self, head: &ResponseHead, demux: &Arc<StreamDemultiplexor>);
}

/// How a queued response should be read.
#[derive(Clone, Default)]
pub(crate) struct ExchangeOptions {
    pub head_request: bool,
    pub via_proxy: bool,
    pub timeout: Option<Duration>,
    pub observer: Option<Arc<dyn HeadObserver>>,
}

enum Stage {
    Queued(Ticket),
    Head(Turn),
    Body(Turn, BodyDecoder),
    Complete,
    Failed(NetError),
}

struct Exchange {
    stage: Stage,
    head: Option<ResponseHead>,
    cached: BytesMut,
    demux: Option<Arc<StreamDemultiplexor>>,
    opts: ExchangeOptions,
}

fn keeps_socket(head: &ResponseHead, framing: BodyFraming, via_proxy: bool) -> bool {
    if framing == BodyFraming::UntilClose || head.status == StatusCode::SWITCHING_PROTOCOLS {
        return false;
    }
    let mut tokens = head.header_joined("connection").unwrap_or_default();
    if via_proxy {
        if let Some(proxy) = head.header_joined("proxy-connection") {
            tokens = format!("{tokens}, {proxy}");
        }
    }
    if has_token(&tokens, "close") {
        return false;
    }
    head.version >= ProtocolVersion::HTTP_1_1 || has_token(&tokens, "keep-alive")
}

impl Exchange {
    fn finished() -> Self {
        Self {
            stage: Stage::Complete,
            head: None,
            cached: BytesMut::new(),
            demux: None,
            opts: ExchangeOptions::default(),
        }
    }

    fn fail(&mut self, err: NetError) -> NetError {
        if let Some(demux) = &self.demux {
            demux.fail(err);
        }
        self.stage = Stage::Failed(err);
        err
    }

    /// Wait for the socket turn. Cancel safe: the ticket stays in place.
    async fn acquire(&mut self) -> Result<(), NetError> {
        let Stage::Queued(ticket) = &mut self.stage else {
            return Ok(());
        };
        if let Some(demux) = &self.demux {
            for earlier in demux.predecessors(ticket.seq) {
                earlier.buffer_remaining().await;
            }
        }
        match (&mut ticket.rx).await {
            Ok(Ok(turn)) => {
                self.stage = Stage::Head(turn);
                Ok(())
            }
            Ok(Err(err)) => {
                self.stage = Stage::Failed(err);
                Err(err)
            }
            Err(_) => {
                self.stage = Stage::Failed(NetError::ConnectionAborted);
                Err(NetError::ConnectionAborted)
            }
        }
    }

    /// Read heads until the final one, skipping interim 1xx responses.
    async fn ensure_head(&mut self) -> Result<(), NetError> {
        let timeout = self.opts.timeout.filter(|t| !t.is_zero());
        loop {
            match &mut self.stage {
                Stage::Failed(err) => return Err(*err),
                Stage::Complete | Stage::Body(..) => return Ok(()),
                Stage::Queued(_) => self.acquire().await?,
                Stage::Head(turn) => {
                    let read = match timeout {
                        Some(limit) => tokio::time::timeout(limit, read_head(turn))
                            .await
                            .unwrap_or(Err(NetError::ConnectionTimedOut)),
                        None => read_head(turn).await,
                    };
                    match read {
                        Err(err) => return Err(self.fail(err)),
                        Ok(head)
                            if head.status.is_informational()
                                && head.status != StatusCode::SWITCHING_PROTOCOLS =>
                        {
                            tracing::trace!(status = head.status.as_u16(), "skipping interim response");
                        }
                        Ok(head) => self.accept_head(head)?,
                    }
                }
            }
        }
    }

    fn accept_head(&mut self, head: ResponseHead) -> Result<(), NetError> {
        let framing = match BodyFraming::for_response(&head, self.opts.head_request) {
            Ok(framing) => framing,
            Err(err) => return Err(self.fail(err)),
        };
        let turn = match std::mem::replace(&mut self.stage, Stage::Complete) {
            Stage::Head(turn) => turn,
            other => {
                self.stage = other;
                return Ok(());
            }
        };

        if let Some(demux) = &self.demux {
            if !keeps_socket(&head, framing, self.opts.via_proxy) {
                demux.mark_for_close();
            }
            if let Some(observer) = &self.opts.observer {
                observer.on_head(&head, demux);
            }
            if framing == BodyFraming::Empty {
                demux.release(turn);
            } else {
                self.stage = Stage::Body(turn, BodyDecoder::new(framing));
            }
        }
        self.head = Some(head);
        Ok(())
    }

    /// Next body piece straight from the socket, ignoring the cache.
    async fn read_body_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        self.ensure_head().await?;
        let read = match &mut self.stage {
            Stage::Body(turn, decoder) => decoder.next_chunk(turn).await,
            Stage::Failed(err) => return Err(*err),
            _ => return Ok(None),
        };
        match read {
            Ok(Some(data)) => Ok(Some(data)),
            Ok(None) => {
                if let Stage::Body(turn, _) = std::mem::replace(&mut self.stage, Stage::Complete) {
                    if let Some(demux) = &self.demux {
                        demux.release(turn);
                    }
                }
                Ok(None)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        if !self.cached.is_empty() {
            return Ok(Some(self.cached.split().freeze()));
        }
        self.read_body_chunk().await
    }

    /// Pull the rest of this response into memory so later responses can
    /// have the socket.
    async fn buffer_all(&mut self) {
        while let Ok(Some(data)) = self.read_body_chunk().await {
            self.cached.extend_from_slice(&data);
        }
    }

    async fn drain(&mut self) {
        while let Ok(Some(_)) = self.read_body_chunk().await {}
    }

    fn is_settled(&self) -> bool {
        matches!(self.stage, Stage::Complete | Stage::Failed(_))
    }
}

struct ResponseShared {
    exchange: Mutex<Exchange>,
}

impl QueuedExchange for ResponseShared {
    fn buffer_remaining(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut exchange = self.exchange.lock().await;
            exchange.buffer_all().await;
        })
    }
}

impl Drop for ResponseShared {
    fn drop(&mut self) {
        let exchange = std::mem::replace(self.exchange.get_mut(), Exchange::finished());
        if exchange.is_settled() {
            return;
        }
        let Some(demux) = exchange.demux.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::trace!(demux = demux.id(), "draining unread response");
                let mut exchange = exchange;
                handle.spawn(async move { exchange.drain().await });
            }
            Err(_) => demux.abort(),
        }
    }
}

/// A response handle. Clones share the same underlying exchange.
#[derive(Clone)]
pub struct Response {
    shared: Arc<ResponseShared>,
}

impl Response {
    /// Queue a response on `demux`, behind every response already queued.
    pub(crate) fn queued(
        demux: &Arc<StreamDemultiplexor>,
        opts: ExchangeOptions,
    ) -> Result<Response, NetError> {
        let shared = Arc::new_cyclic(|weak: &Weak<ResponseShared>| {
            let me: Weak<dyn QueuedExchange> = weak.clone();
            let stage = match demux.register(me) {
                Ok(ticket) => Stage::Queued(ticket),
                Err(err) => Stage::Failed(err),
            };
            ResponseShared {
                exchange: Mutex::new(Exchange {
                    stage,
                    head: None,
                    cached: BytesMut::new(),
                    demux: Some(demux.clone()),
                    opts,
                }),
            }
        });
        if let Ok(exchange) = shared.exchange.try_lock() {
            if let Stage::Failed(err) = exchange.stage {
                return Err(err);
            }
        }
        Ok(Response { shared })
    }

    /// A response that is already complete, e.g. a rejected CONNECT or one
    /// supplied by a module.
    pub fn ready(head: ResponseHead, body: Bytes) -> Response {
        let mut exchange = Exchange::finished();
        exchange.head = Some(head);
        exchange.cached.extend_from_slice(&body);
        Response {
            shared: Arc::new(ResponseShared {
                exchange: Mutex::new(exchange),
            }),
        }
    }

    /// The final response head, waiting for it if necessary.
    pub async fn head(&self) -> Result<ResponseHead, NetError> {
        let mut exchange = self.shared.exchange.lock().await;
        if let Some(head) = &exchange.head {
            return Ok(head.clone());
        }
        exchange.ensure_head().await?;
        exchange.head.clone().ok_or(NetError::InvalidResponse)
    }

    pub async fn status(&self) -> Result<StatusCode, NetError> {
        Ok(self.head().await?.status)
    }

    pub async fn version(&self) -> Result<ProtocolVersion, NetError> {
        Ok(self.head().await?.version)
    }

    pub async fn header(&self, name: &str) -> Result<Option<String>, NetError> {
        Ok(self.head().await?.header_joined(name))
    }

    /// Next piece of the body, or `None` when it is complete.
    pub async fn chunk(&self) -> Result<Option<Bytes>, NetError> {
        self.shared.exchange.lock().await.next_chunk().await
    }

    /// Remaining body as one buffer.
    pub async fn bytes(&self) -> Result<Bytes, NetError> {
        let mut exchange = self.shared.exchange.lock().await;
        let mut body = BytesMut::new();
        while let Some(data) = exchange.next_chunk().await? {
            body.extend_from_slice(&data);
        }
        Ok(body.freeze())
    }

    pub async fn text(&self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    pub async fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| NetError::JsonParseError)
    }

    /// Wait up to `wait` for the server's answer to `Expect: 100-continue`.
    ///
    /// Returns `Some(100)` for a continue (which is consumed), the final
    /// status if the server answered outright, or `None` on timeout.
    pub(crate) async fn wait_continue(&self, wait: Duration) -> Result<Option<StatusCode>, NetError> {
        let deadline = Instant::now() + wait;
        let mut guard = self.shared.exchange.lock().await;
        let exchange = &mut *guard;
        match tokio::time::timeout_at(deadline, exchange.acquire()).await {
            Err(_) => return Ok(None),
            Ok(acquired) => acquired?,
        }
        loop {
            let Stage::Head(turn) = &mut exchange.stage else {
                return Ok(exchange.head.as_ref().map(|h| h.status));
            };
            match tokio::time::timeout_at(deadline, fill_head(turn)).await {
                Err(_) => return Ok(None),
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(exchange.fail(err)),
            }
            let head = match read_head(turn).await {
                Ok(head) => head,
                Err(err) => return Err(exchange.fail(err)),
            };
            if head.status == StatusCode::CONTINUE {
                return Ok(Some(StatusCode::CONTINUE));
            }
            if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
                continue;
            }
            let status = head.status;
            exchange.accept_head(head)?;
            return Ok(Some(status));
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Response");
        if let Ok(exchange) = self.shared.exchange.try_lock() {
            if let Some(head) = &exchange.head {
                out.field("status", &head.status.as_u16());
            }
        }
        out.finish_non_exhaustive()
    }
}
