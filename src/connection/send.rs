//! The send algorithm: stalls, socket selection, writes, retries and the
//! keep-alive bookkeeping that follows every request.

use crate::base::neterror::NetError;
use crate::connection::tunnel::{self, Tunnel};
use crate::connection::{ConnectionInner, Scheme};
use crate::http::assemble::{assemble_headers, AssembleContext, AssembledHeaders};
use crate::http::headers::{has_token, Headers};
use crate::http::request::Request;
use crate::http::requestbody::{BodySink, RequestBody};
use crate::http::response::{ExchangeOptions, HeadObserver, Response};
use crate::http::retry::should_retry;
use crate::http::version::ProtocolVersion;
use crate::socket::demux::StreamDemultiplexor;
use crate::socket::session::SocketSession;
use http::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long to wait for `100 Continue` before sending the body anyway.
pub(crate) const CONTINUE_WAIT: Duration = Duration::from_millis(60);

/// Granularity of the delayed-entity poll.
const DELAY_SLICE: Duration = Duration::from_millis(100);

/// Session selection state, guarded by the Connection's send mutex.
#[derive(Default)]
pub(crate) struct SendState {
    pub session: Option<SocketSession>,
    /// First response of the generation, while the server version is unknown.
    pub early_stall: Option<Response>,
    /// A response later requests must not be pipelined past.
    pub late_stall: Option<Response>,
    pub prev_resp: Option<Response>,
}

impl SendState {
    /// Drop the active session and every stall marker.
    pub fn clear(&mut self) {
        self.session = None;
        self.early_stall = None;
        self.late_stall = None;
        self.prev_resp = None;
    }

    /// Fail the active session after an I/O error and forget the stalls
    /// pointing into it.
    fn close_failed(&mut self, err: NetError) {
        if let Some(session) = self.session.take() {
            session.demux.fail(err);
        }
        self.early_stall = None;
        self.late_stall = None;
        self.prev_resp = None;
    }
}

/// Block until `resp`'s head is known. Errors only unblock.
async fn stall_on(resp: &Response, which: &'static str) {
    tracing::debug!(stall = which, "waiting for earlier response");
    if let Err(err) = resp.head().await {
        tracing::debug!(stall = which, error = %err, "stalled-on response failed");
    }
}

/// Held while a request is only partly on the wire. Dropping it armed
/// (the send future was cancelled) closes the socket: the peer would read
/// the next request as this one's body.
struct PartialWrite {
    demux: Option<Arc<StreamDemultiplexor>>,
}

impl PartialWrite {
    fn arm(demux: &Arc<StreamDemultiplexor>) -> Self {
        Self {
            demux: Some(demux.clone()),
        }
    }

    fn disarm(mut self) {
        self.demux = None;
    }
}

impl Drop for PartialWrite {
    fn drop(&mut self) {
        if let Some(demux) = self.demux.take() {
            tracing::debug!(demux = demux.id(), "request abandoned mid-write, closing socket");
            demux.mark_for_close();
        }
    }
}

enum Attempt {
    Sent {
        response: Response,
        session: SocketSession,
        keep_alive: bool,
        streamed: bool,
    },
    TunnelRejected(Response),
}

fn wants_chunked(headers: &Headers) -> bool {
    headers
        .get("transfer-encoding")
        .is_some_and(|te| has_token(te, "chunked"))
}

impl ConnectionInner {
    /// Decide how a stream of unknown length goes out: chunked, when the
    /// server is known to be HTTP/1.1 or later, else buffered here until
    /// the writer finishes.
    async fn prepare_stream(&self, req: &mut Request) -> Result<(), NetError> {
        let RequestBody::Stream(stream) = req.body_mut() else {
            return Ok(());
        };
        if stream.length().is_some() {
            return Ok(());
        }

        let proto = self.proto.snapshot();
        let server_1_1 = proto
            .known_server_version()
            .is_some_and(|v| v >= ProtocolVersion::HTTP_1_1);
        if server_1_1 && !self.config.dont_chunk_requests {
            let te = match req.headers().get("transfer-encoding") {
                Some(te) if has_token(te, "chunked") => return Ok(()),
                Some(te) => format!("{te}, chunked"),
                None => "chunked".to_string(),
            };
            return req.headers_mut().insert("Transfer-Encoding", &te);
        }

        tracing::debug!("buffering streamed body to compute its length");
        let (tx, rx) = oneshot::channel();
        stream.link(BodySink::Buffer(tx)).map_err(|_| NetError::Aborted)?;
        let data = rx.await.map_err(|_| NetError::ConnectionAborted)?;
        req.set_body(data);
        Ok(())
    }

    /// Send `req` on this connection: the whole of the per-request
    /// algorithm below the module pipeline.
    pub(crate) async fn send_request(
        &self,
        req: &mut Request,
        timeout: Option<Duration>,
    ) -> Result<Response, NetError> {
        self.prepare_stream(req).await?;

        let mut state = self.send.lock().await;

        if let Some(first) = state.early_stall.take() {
            stall_on(&first, "early").await;
        }

        let headers = Headers::merged(&self.default_headers(), req.headers());
        let proxy = self.proxy();
        let via_http_proxy = proxy.is_some() && self.scheme == Scheme::Http;
        let proto = self.proto.snapshot();
        let assembled = {
            let ctx = AssembleContext {
                scheme: self.scheme.as_str(),
                host: &self.host,
                port: self.port,
                default_port: self.scheme.default_port(),
                request_version: proto.request_version,
                server_version: proto.known_server_version(),
                via_http_proxy,
            };
            assemble_headers(req, &headers, &ctx)
        };

        let keep_alive = (proto.server_version >= ProtocolVersion::HTTP_1_1
            && !has_token(&assembled.connection, "close"))
            || (proto.server_version == ProtocolVersion::HTTP_1_0
                && has_token(&assembled.connection, "keep-alive"));

        if let Some(late) = state.late_stall.take() {
            let keep_alive_unknown = self.proto.lock().keep_alive_unknown;
            if state.session.is_some() || keep_alive_unknown {
                stall_on(&late, "late").await;
            }
        }

        if (*req.method() == Method::POST || req.dont_pipeline()) && state.session.is_some() {
            if let Some(prev) = state.prev_resp.clone() {
                stall_on(&prev, "idempotency").await;
            }
        }

        let mut finished = self.output_finished.subscribe();
        if !*finished.borrow() {
            tracing::debug!("waiting for previous streamed body");
            finished
                .wait_for(|done| *done)
                .await
                .map_err(|_| NetError::ConnectionAborted)?;
        }

        if req.is_aborted() {
            return Err(NetError::Aborted);
        }

        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self
                .attempt(&mut state, req, &headers, &assembled, via_http_proxy, keep_alive, timeout)
                .await
            {
                Ok(outcome) => break outcome,
                Err(err) => {
                    tracing::error!(host = %self.host, attempt, error = %err, "send failed");
                    state.close_failed(err);
                    if req.is_aborted() {
                        return Err(NetError::Aborted);
                    }
                    match should_retry(&err, attempt, false) {
                        Some(reason) => {
                            tracing::info!(host = %self.host, attempt, ?reason, "retrying request");
                        }
                        None => return Err(err),
                    }
                }
            }
        };

        let (response, session, keep_alive, streamed) = match outcome {
            Attempt::TunnelRejected(response) => return Ok(response),
            Attempt::Sent {
                response,
                session,
                keep_alive,
                streamed,
            } => (response, session, keep_alive, streamed),
        };

        state.prev_resp = Some(response.clone());
        let mut proto = self.proto.lock();
        proto.sent_any = true;
        let budget_spent = match proto.keep_alive_req_left {
            Some(left) => {
                let left = left.saturating_sub(1);
                proto.keep_alive_req_left = Some(left);
                left == 0
            }
            None => false,
        };

        if (!proto.keep_alive_unknown && !proto.does_keep_alive) || !keep_alive || budget_spent {
            tracing::debug!(
                demux = session.demux.id(),
                keep_alive,
                budget_spent,
                "closing session after this request"
            );
            session.demux.mark_for_close();
            state.session = None;
        } else {
            session.demux.restart_timer();
        }

        if !proto.version_known {
            state.early_stall = Some(response.clone());
        }
        if proto.keep_alive_unknown
            || !req.is_idempotent()
            || req.dont_pipeline()
            || self.config.never_pipeline
        {
            state.late_stall = Some(response.clone());
        }
        drop(proto);

        if !streamed {
            self.output_finished.send_replace(true);
        }
        Ok(response)
    }

    /// Acquire a socket, tunnelling and wrapping in TLS as needed.
    async fn open_session(
        &self,
        state: &mut SendState,
        headers: &Headers,
        timeout: Option<Duration>,
    ) -> Result<Result<SocketSession, Response>, NetError> {
        if let Some(session) = state.session.take() {
            if session.is_reusable() {
                if !session.demux.peer_closed() {
                    state.session = Some(session.clone());
                    return Ok(Ok(session));
                }
                tracing::debug!(demux = session.demux.id(), "peer closed idle socket, reconnecting");
                session.demux.fail(NetError::ConnectionClosed);
            }
        }

        let tls = match self.scheme {
            Scheme::Https => Some(self.tls.clone().ok_or(NetError::TlsUnavailable)?),
            Scheme::Http => None,
        };
        let proxy = self.proxy();
        let (host, port) = match &proxy {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (self.host.as_str(), self.port),
        };
        let mut socket = self.connect_job.connect(host, port, timeout).await?;

        if let Some(tls) = tls {
            if let Some(proxy) = &proxy {
                socket = match tunnel::establish(self, socket, headers, proxy, timeout).await? {
                    Tunnel::Open(socket) => socket,
                    Tunnel::Rejected(response) => return Ok(Err(response)),
                };
            }
            socket = tls.connect(self.host.clone(), socket).await?;
        }

        let idle = Duration::from_millis(self.config.keep_alive_idle_ms);
        let session = SocketSession::new(socket, &self.host, idle);
        self.track_demux(&session.demux);
        {
            let mut proto = self.proto.lock();
            proto.keep_alive_req_left = proto.keep_alive_req_max;
        }
        state.session = Some(session.clone());
        Ok(Ok(session))
    }

    /// Wait up to `delay` for the server to speak before a request body is
    /// sent. Only sees bytes while no earlier response is reading.
    async fn answered_within(&self, session: &SocketSession, delay: Duration) -> bool {
        let slices = (delay.as_millis() / DELAY_SLICE.as_millis()).max(1) as u32;
        let slice = delay / slices;
        for _ in 0..slices {
            if session.demux.available() > 0 {
                return true;
            }
            tokio::time::sleep(slice).await;
        }
        session.demux.available() > 0
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        state: &mut SendState,
        req: &mut Request,
        headers: &Headers,
        assembled: &AssembledHeaders,
        via_http_proxy: bool,
        mut keep_alive: bool,
        timeout: Option<Duration>,
    ) -> Result<Attempt, NetError> {
        let session = match self.open_session(state, headers, timeout).await? {
            Ok(session) => session,
            Err(rejected) => return Ok(Attempt::TunnelRejected(rejected)),
        };

        if req.is_aborted() {
            return Err(NetError::Aborted);
        }
        let partial = PartialWrite::arm(&session.demux);
        session.writer.write_all(&assembled.block).await?;

        // The delay window reads the parked turn, so it runs before this
        // request's response claims it.
        let delay = req
            .delay_entity()
            .filter(|_| self.config.delayed_entity_write)
            .filter(|_| matches!(req.body(), RequestBody::Bytes(data) if !data.is_empty()));
        let early_answer = match delay {
            Some(delay) => self.answered_within(&session, delay).await,
            None => false,
        };

        let observer: Arc<dyn HeadObserver> = self.proto.watcher(via_http_proxy);
        let response = Response::queued(
            &session.demux,
            ExchangeOptions {
                head_request: *req.method() == Method::HEAD,
                via_proxy: via_http_proxy,
                timeout,
                observer: Some(observer),
            },
        )?;

        let mut send_body = true;
        if early_answer {
            tracing::debug!("server answered before the body was sent, skipping it");
            send_body = false;
            keep_alive = false;
        }
        let server_1_1 = self
            .proto
            .lock()
            .known_server_version()
            .is_some_and(|v| v >= ProtocolVersion::HTTP_1_1);
        if send_body && server_1_1 && has_token(&assembled.expect, "100-continue") && req.body().is_present() {
            match response.wait_continue(CONTINUE_WAIT).await? {
                Some(StatusCode::CONTINUE) => tracing::debug!("got 100 Continue"),
                Some(status) => {
                    tracing::debug!(status = status.as_u16(), "final status before body, not sending it");
                    send_body = false;
                    keep_alive = false;
                }
                None => tracing::debug!("no 100 Continue in time, sending body"),
            }
        }

        let mut streamed = false;
        let chunked = wants_chunked(req.headers());
        match req.body_mut() {
            RequestBody::Bytes(data) if send_body && !data.is_empty() => {
                session.writer.write_all(data).await?;
            }
            RequestBody::Stream(stream) if send_body => {
                self.output_finished.send_replace(false);
                let linked = stream.link(BodySink::Socket {
                    writer: session.writer.clone(),
                    chunked,
                    finished: self.output_finished.clone(),
                    demux: session.demux.clone(),
                });
                if let Err(err) = linked {
                    self.output_finished.send_replace(true);
                    tracing::debug!(error = %err, "body writer unavailable");
                    return Err(NetError::Aborted);
                }
                streamed = true;
            }
            _ => {}
        }
        partial.disarm();

        Ok(Attempt::Sent {
            response,
            session,
            keep_alive,
            streamed,
        })
    }
}
