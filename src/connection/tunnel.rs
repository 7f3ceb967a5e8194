//! CONNECT tunnels through an HTTP proxy for `https` connections.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::connection::ConnectionInner;
use crate::http::assemble::{assemble_headers, AssembleContext};
use crate::http::head::{read_head, ResponseHead};
use crate::http::headers::Headers;
use crate::http::module::{run_request_handlers, run_response_handlers};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::responsebody::{BodyDecoder, BodyFraming};
use crate::http::ResponseOutcome;
use crate::socket::demux::Turn;
use crate::socket::proxy::ProxyConfig;
use crate::socket::stream::BoxedSocket;
use bytes::BytesMut;
use http::StatusCode;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Result of tunnel negotiation.
pub(crate) enum Tunnel {
    /// The proxy answered 200; the socket now carries raw bytes to the origin.
    Open(BoxedSocket),
    /// The proxy refused and no module asked to try again.
    Rejected(Response),
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// The CONNECT subrequest for `inner`'s origin. Only `User-Agent` and
/// `Proxy-Authorization` are carried over from the triggering request.
fn connect_request(inner: &ConnectionInner, headers: &Headers, proxy: &ProxyConfig) -> Result<Request, NetError> {
    let mut req = Request::connect(authority(&inner.host, inner.port));
    for name in ["User-Agent", "Proxy-Authorization"] {
        if let Some(value) = headers.get(name) {
            req.headers_mut().insert(name, value)?;
        }
    }
    if !req.headers().contains("proxy-authorization") {
        if let Some(creds) = proxy.credentials() {
            req.headers_mut().insert("Proxy-Authorization", &creds.auth_header())?;
        }
    }
    Ok(req)
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, NetError>>,
) -> Result<T, NetError> {
    match timeout {
        Some(t) if !t.is_zero() => tokio::time::timeout(t, fut)
            .await
            .map_err(|_| NetError::ConnectionTimedOut)?,
        _ => fut.await,
    }
}

/// Read the proxy's final answer to a CONNECT.
async fn read_final_head(turn: &mut Turn) -> Result<ResponseHead, NetError> {
    loop {
        let head = read_head(turn).await?;
        if !head.status.is_informational() {
            return Ok(head);
        }
    }
}

/// Negotiate a tunnel over `socket`, which is connected to `proxy`.
///
/// `headers` is the triggering request's effective header set. Request
/// modules see every CONNECT attempt; response modules decide whether a
/// refusal is retried on a fresh proxy socket.
pub(crate) async fn establish(
    inner: &ConnectionInner,
    mut socket: BoxedSocket,
    headers: &Headers,
    proxy: &ProxyConfig,
    timeout: Option<Duration>,
) -> Result<Tunnel, NetError> {
    let modules = inner.modules();
    let max_restarts = inner.config.max_module_restarts;
    let mut connect = connect_request(inner, headers, proxy)?;
    let mut resends = 0usize;

    loop {
        run_request_handlers(&modules, &mut connect, max_restarts)?;

        let proto = inner.proto.snapshot();
        let ctx = AssembleContext {
            scheme: inner.scheme.as_str(),
            host: &inner.host,
            port: inner.port,
            default_port: inner.scheme.default_port(),
            request_version: proto.request_version,
            server_version: proto.known_server_version(),
            via_http_proxy: false,
        };
        let assembled = assemble_headers(&connect, connect.headers(), &ctx);
        tracing::debug!(proxy = %proxy.addr(), target = %connect.target(), "sending CONNECT");
        socket
            .write_all(&assembled.block)
            .await
            .transfer_context(&proxy.host)?;
        socket.flush().await.transfer_context(&proxy.host)?;

        let (read, write) = tokio::io::split(socket);
        let mut turn = Turn::detached(read);
        let head = with_timeout(timeout, read_final_head(&mut turn)).await?;

        if head.status == StatusCode::OK {
            let (read, leftover) = turn.into_parts();
            if !leftover.is_empty() {
                tracing::debug!(bytes = leftover.len(), "proxy sent data after CONNECT 200");
                return Err(NetError::TunnelConnectionFailed);
            }
            tracing::debug!(proxy = %proxy.addr(), "tunnel established");
            return Ok(Tunnel::Open(read.unsplit(write)));
        }

        tracing::debug!(proxy = %proxy.addr(), status = head.status.as_u16(), "CONNECT refused");
        let mut body = BytesMut::new();
        let framing = BodyFraming::for_response(&head, false)?;
        let mut decoder = BodyDecoder::new(framing);
        let drained = with_timeout(timeout, async {
            while let Some(data) = decoder.next_chunk(&mut turn).await? {
                body.extend_from_slice(&data);
            }
            Ok(())
        })
        .await;
        if let Err(err) = drained {
            tracing::debug!(error = %err, "discarding partial CONNECT response body");
        }
        drop(turn);
        drop(write);

        let response = Response::ready(head.clone(), body.freeze());
        match run_response_handlers(&modules, &mut connect, &head) {
            ResponseOutcome::Resend if resends < max_restarts => {
                resends += 1;
                socket = inner.connect_job.connect(&proxy.host, proxy.port, timeout).await?;
            }
            _ => return Ok(Tunnel::Rejected(response)),
        }
    }
}
