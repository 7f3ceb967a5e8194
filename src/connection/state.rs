//! What a Connection has learned about its peer.

use crate::base::loadstate::LoadState;
use crate::http::head::ResponseHead;
use crate::http::headers::{element_value, has_token};
use crate::http::response::HeadObserver;
use crate::http::version::ProtocolVersion;
use crate::socket::demux::StreamDemultiplexor;
use http::StatusCode;
use std::sync::{Arc, Mutex, MutexGuard};

/// Protocol-version and keep-alive knowledge, reset whenever the upstream
/// peer changes.
#[derive(Debug, Clone)]
pub(crate) struct ProtoState {
    /// Bumped on every renegotiation; responses from older generations no
    /// longer update this state.
    pub generation: u64,
    pub request_version: ProtocolVersion,
    pub server_version: ProtocolVersion,
    pub version_known: bool,
    pub keep_alive_unknown: bool,
    pub does_keep_alive: bool,
    /// `Keep-Alive: max=N` from an HTTP/1.0 server.
    pub keep_alive_req_max: Option<u32>,
    /// Requests left on the current socket.
    pub keep_alive_req_left: Option<u32>,
    pub sent_any: bool,
}

/// Snapshot of a Connection's negotiated protocol knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Server version, once known.
    pub server_version: Option<ProtocolVersion>,
    /// Version written on request lines.
    pub request_version: ProtocolVersion,
    /// Whether the server keeps connections alive, once known.
    pub keep_alive: Option<bool>,
    /// Per-socket request budget announced by an HTTP/1.0 server.
    pub keep_alive_max: Option<u32>,
}

impl ProtoState {
    pub fn new(force_http_1_0: bool) -> Self {
        let mut state = Self {
            generation: 0,
            request_version: ProtocolVersion::HTTP_1_1,
            server_version: ProtocolVersion::HTTP_1_1,
            version_known: false,
            keep_alive_unknown: true,
            does_keep_alive: false,
            keep_alive_req_max: None,
            keep_alive_req_left: None,
            sent_any: false,
        };
        state.reset(force_http_1_0);
        state
    }

    fn reset(&mut self, force_http_1_0: bool) {
        if force_http_1_0 {
            self.server_version = ProtocolVersion::HTTP_1_0;
            self.version_known = true;
            self.request_version = ProtocolVersion::HTTP_1_0;
        } else {
            self.server_version = ProtocolVersion::HTTP_1_1;
            self.version_known = false;
            self.request_version = ProtocolVersion::HTTP_1_1;
        }
        self.keep_alive_unknown = true;
        self.does_keep_alive = false;
        self.keep_alive_req_max = None;
        self.keep_alive_req_left = None;
        self.sent_any = false;
    }

    /// Forget everything learned about the peer.
    pub fn renegotiate(&mut self, force_http_1_0: bool) {
        self.generation += 1;
        self.reset(force_http_1_0);
    }

    pub fn known_server_version(&self) -> Option<ProtocolVersion> {
        self.version_known.then_some(self.server_version)
    }

    pub fn load_state(&self) -> LoadState {
        if !self.sent_any && (!self.version_known || self.keep_alive_unknown) {
            LoadState::Fresh
        } else if !self.version_known || self.keep_alive_unknown {
            LoadState::Negotiating
        } else {
            LoadState::Established
        }
    }

    pub fn info(&self) -> ProtocolInfo {
        ProtocolInfo {
            server_version: self.known_server_version(),
            request_version: self.request_version,
            keep_alive: (!self.keep_alive_unknown).then_some(self.does_keep_alive),
            keep_alive_max: self.keep_alive_req_max,
        }
    }

    /// Learn the server version from the first response. Returns `true` when
    /// the socket must be closed because the server choked on our version.
    pub fn handle_first_response(&mut self, head: &ResponseHead, via_http_proxy: bool) -> bool {
        self.server_version = head.version;
        self.version_known = true;

        // HTTP/1.0 proxies often pass a 1.1 status line through unchanged.
        let status = head.status;
        if via_http_proxy
            && !head.headers.contains_key("via")
            && status != StatusCode::PROXY_AUTHENTICATION_REQUIRED
            && status != StatusCode::BAD_GATEWAY
            && status != StatusCode::GATEWAY_TIMEOUT
        {
            self.server_version = ProtocolVersion::HTTP_1_0;
        }
        tracing::debug!(version = %self.server_version, "server protocol version established");

        if self.server_version == ProtocolVersion::HTTP_1_0
            && (status == StatusCode::BAD_REQUEST || status == StatusCode::INTERNAL_SERVER_ERROR)
        {
            tracing::debug!(status = status.as_u16(), "downgrading requests to HTTP/1.0");
            self.request_version = ProtocolVersion::HTTP_1_0;
            return true;
        }
        false
    }

    pub fn determine_keep_alive(&mut self, head: &ResponseHead, via_http_proxy: bool) {
        let connection = if via_http_proxy {
            head.header_joined("proxy-connection")
        } else {
            head.header_joined("connection")
        };
        let says_keep_alive = connection.is_some_and(|c| has_token(&c, "keep-alive"));

        if self.server_version >= ProtocolVersion::HTTP_1_1 || says_keep_alive {
            self.does_keep_alive = true;
            self.keep_alive_unknown = false;
            tracing::debug!("keep-alive enabled");
        } else if head.status.as_u16() < 400 {
            self.keep_alive_unknown = false;
            tracing::debug!("server does not keep connections alive");
        }

        if self.does_keep_alive && self.server_version == ProtocolVersion::HTTP_1_0 {
            let max = head
                .header_joined("keep-alive")
                .and_then(|ka| element_value(&ka, "max"))
                .and_then(|max| max.trim().parse::<u32>().ok());
            if let Some(max) = max {
                tracing::debug!(max, "keep-alive request budget");
                self.keep_alive_req_max = Some(max);
                self.keep_alive_req_left = Some(max);
            }
        }
    }
}

/// Shared handle to a Connection's [`ProtoState`].
#[derive(Debug, Clone)]
pub(crate) struct SharedProto(Arc<Mutex<ProtoState>>);

impl SharedProto {
    pub fn new(force_http_1_0: bool) -> Self {
        Self(Arc::new(Mutex::new(ProtoState::new(force_http_1_0))))
    }

    pub fn lock(&self) -> MutexGuard<'_, ProtoState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ProtoState {
        self.lock().clone()
    }

    /// Observer for responses sent in the current generation.
    pub fn watcher(&self, via_http_proxy: bool) -> Arc<ResponseWatcher> {
        Arc::new(ResponseWatcher {
            proto: self.clone(),
            generation: self.lock().generation,
            via_http_proxy,
        })
    }
}

/// Feeds response heads back into the protocol state.
pub(crate) struct ResponseWatcher {
    proto: SharedProto,
    generation: u64,
    via_http_proxy: bool,
}

impl HeadObserver for ResponseWatcher {
    fn on_head(&self, head: &ResponseHead, demux: &Arc<StreamDemultiplexor>) {
        let mut proto = self.proto.lock();
        if proto.generation != self.generation {
            return;
        }
        if !proto.version_known && proto.handle_first_response(head, self.via_http_proxy) {
            demux.mark_for_close();
        }
        if proto.keep_alive_unknown {
            proto.determine_keep_alive(head, self.via_http_proxy);
        }
    }
}
