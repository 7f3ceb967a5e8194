//! Outgoing requests.

use crate::base::neterror::NetError;
use crate::connection::Connection;
use crate::http::headers::Headers;
use crate::http::requestbody::RequestBody;
use http::Method;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to a request's `aborted` flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// One outgoing HTTP message.
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    headers: Headers,
    body: RequestBody,
    abort: AbortHandle,
    dont_pipeline: bool,
    internal_subrequest: bool,
    delay_entity: Option<Duration>,
    connection: Option<Connection>,
}

impl Request {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Headers::new(),
            body: RequestBody::Empty,
            abort: AbortHandle::default(),
            dont_pipeline: false,
            internal_subrequest: false,
            delay_entity: None,
            connection: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn head(target: impl Into<String>) -> Self {
        Self::new(Method::HEAD, target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(Method::POST, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: impl Into<RequestBody>) -> Self {
        Self::new(Method::PUT, target).with_body(body)
    }

    /// CONNECT to `authority` (`host:port`) for tunnelling through a proxy.
    pub(crate) fn connect(authority: String) -> Self {
        let mut req = Self::new(Method::CONNECT, authority);
        req.internal_subrequest = true;
        req
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, NetError> {
        self.headers.insert(name, value)?;
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn set_headers(&mut self, headers: Headers) {
        self.headers = headers;
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<RequestBody>) {
        self.body = body.into();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Never pipeline this request behind an outstanding response.
    pub fn set_dont_pipeline(&mut self, dont: bool) {
        self.dont_pipeline = dont;
    }

    pub fn dont_pipeline(&self) -> bool {
        self.dont_pipeline
    }

    /// Protocol-internal requests (CONNECT) skip most of the module pipeline.
    pub fn is_internal_subrequest(&self) -> bool {
        self.internal_subrequest
    }

    /// Before writing a byte payload, wait up to `delay` for an early
    /// response from the server.
    pub fn set_delay_entity(&mut self, delay: Duration) {
        self.delay_entity = (!delay.is_zero()).then_some(delay);
    }

    pub fn delay_entity(&self) -> Option<Duration> {
        self.delay_entity
    }

    /// The connection a module wants this request moved to.
    pub fn set_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    pub fn take_connection(&mut self) -> Option<Connection> {
        self.connection.take()
    }

    /// Idempotent per RFC 7231 section 4.2.2.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let req = Request::post("/upload", "data")
            .with_header("Content-Type", "text/plain")
            .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.target(), "/upload");
        assert_eq!(req.headers().get("content-type"), Some("text/plain"));
        assert_eq!(req.body().len(), Some(4));
        assert!(!req.is_idempotent());
    }

    #[test]
    fn test_abort_handle_shares_flag() {
        let req = Request::get("/");
        let handle = req.abort_handle();
        assert!(!req.is_aborted());
        handle.abort();
        assert!(req.is_aborted());
    }

    #[test]
    fn test_connect_is_internal() {
        let req = Request::connect("example.com:443".to_string());
        assert!(req.is_internal_subrequest());
        assert_eq!(req.method(), Method::CONNECT);
        assert!(!Request::get("/").is_internal_subrequest());
    }

    #[test]
    fn test_zero_delay_is_none() {
        let mut req = Request::post("/", "x");
        req.set_delay_entity(Duration::ZERO);
        assert_eq!(req.delay_entity(), None);
        req.set_delay_entity(Duration::from_millis(250));
        assert_eq!(req.delay_entity(), Some(Duration::from_millis(250)));
    }
}
