//! Request line and header block assembly.

use crate::http::headers::{has_token, remove_token, Headers};
use crate::http::request::Request;
use crate::http::requestbody::RequestBody;
use crate::http::version::ProtocolVersion;
use bytes::{BufMut, Bytes, BytesMut};

/// Product token appended to every `User-Agent`.
pub const USER_AGENT: &str = concat!("pipenet/", env!("CARGO_PKG_VERSION"));

/// Headers written by the assembler itself rather than copied through.
const SPECIAL: &[&str] = &[
    "host",
    "content-type",
    "content-length",
    "user-agent",
    "connection",
    "proxy-connection",
    "keep-alive",
    "expect",
    "te",
];

/// What the assembler needs to know about the connection.
#[derive(Debug, Clone)]
pub struct AssembleContext<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub default_port: u16,
    /// Version written on the request line.
    pub request_version: ProtocolVersion,
    /// Server version, once known.
    pub server_version: Option<ProtocolVersion>,
    /// Going through an HTTP proxy without a tunnel.
    pub via_http_proxy: bool,
}

impl AssembleContext<'_> {
    fn server_is_1_1(&self) -> bool {
        matches!(self.server_version, Some(v) if v >= ProtocolVersion::HTTP_1_1)
    }

    fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.to_string()
        };
        if self.port == self.default_port {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// An assembled header block plus the values the sender acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledHeaders {
    pub block: Bytes,
    /// Value of the `Connection` (or `Proxy-Connection`) header as requested,
    /// empty when none was sent.
    pub connection: String,
    /// Value of the `Expect` header as sent, empty when none was sent.
    pub expect: String,
}

fn is_unsafe(b: u8) -> bool {
    b <= 0x20 || b >= 0x7f || b"\"<>\\^`{|}".contains(&b)
}

/// Percent-escape characters that may not appear raw in a request target.
pub fn escape_unsafe_chars(target: &str) -> String {
    if !target.bytes().any(is_unsafe) {
        return target.to_string();
    }
    let mut out = String::with_capacity(target.len() + 8);
    for b in target.bytes() {
        if is_unsafe(b) {
            out.push_str(&format!("%{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

fn line(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Build the request line and headers for `req`, whose effective header set
/// (defaults merged with the request's own) is `headers`.
pub fn assemble_headers(req: &Request, headers: &Headers, ctx: &AssembleContext<'_>) -> AssembledHeaders {
    let mut buf = BytesMut::with_capacity(600);
    let get = |name: &str| headers.get(name).map(str::trim);

    let target = escape_unsafe_chars(req.target());
    let request_line = if ctx.via_http_proxy && target != "*" {
        format!(
            "{} {}://{}{} {}\r\n",
            req.method(),
            ctx.scheme,
            ctx.authority(),
            target,
            ctx.request_version
        )
    } else {
        format!("{} {} {}\r\n", req.method(), target, ctx.request_version)
    };
    buf.put_slice(request_line.as_bytes());

    match get("host") {
        Some(host) => line(&mut buf, "Host", host),
        None => line(&mut buf, "Host", &ctx.authority()),
    }

    let mut connection = String::new();
    let mut co_hdr = None;
    let user_connection = get("connection");
    if !(ctx.server_is_1_1() && user_connection.is_none()) {
        connection = user_connection.unwrap_or("Keep-Alive").to_string();
        if let Some(keep_alive) = get("keep-alive") {
            if has_token(&connection, "keep-alive") {
                line(&mut buf, "Keep-Alive", keep_alive);
            }
        }
        co_hdr = Some(connection.clone());
    }
    if ctx.via_http_proxy && !ctx.server_is_1_1() {
        if let Some(proxy_connection) = co_hdr.take() {
            line(&mut buf, "Proxy-Connection", &proxy_connection);
        }
    }
    let mut co_hdr = match co_hdr {
        Some(co) if has_token(&co, "TE") => co,
        Some(co) => format!("{co}, TE"),
        None => "TE".to_string(),
    };
    if headers.contains("upgrade") {
        co_hdr.push_str(", Upgrade");
    }
    line(&mut buf, "Connection", &co_hdr);

    match get("te") {
        Some(te) if has_token(te, "trailers") => line(&mut buf, "TE", te),
        Some(te) => line(&mut buf, "TE", &format!("trailers, {te}")),
        None => line(&mut buf, "TE", "trailers"),
    }

    match get("user-agent") {
        Some(ua) => line(&mut buf, "User-Agent", &format!("{ua} {USER_AGENT}")),
        None => line(&mut buf, "User-Agent", USER_AGENT),
    }

    for (name, value) in headers.iter() {
        let lower = name.trim().to_ascii_lowercase();
        if !SPECIAL.contains(&lower.as_str()) {
            line(&mut buf, name.trim(), value.trim());
        }
    }

    let mut expect = String::new();
    let body = req.body();
    if body.is_present() {
        line(
            &mut buf,
            "Content-type",
            get("content-type").unwrap_or("application/octet-stream"),
        );
        match body {
            RequestBody::Bytes(data) => {
                line(&mut buf, "Content-length", &data.len().to_string());
            }
            RequestBody::Stream(stream) if !headers.contains("transfer-encoding") => {
                if let Some(length) = stream.length() {
                    line(&mut buf, "Content-length", &length.to_string());
                }
            }
            _ => {}
        }
        if let Some(value) = get("expect") {
            expect = value.to_string();
            line(&mut buf, "Expect", &expect);
        }
    } else if let Some(value) = get("expect") {
        let remaining = remove_token(value, "100-continue");
        if !remaining.is_empty() {
            expect = remaining;
            line(&mut buf, "Expect", &expect);
        }
    }

    buf.put_slice(b"\r\n");
    AssembledHeaders {
        block: buf.freeze(),
        connection,
        expect,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AssembleContext<'static> {
        AssembleContext {
            scheme: "http",
            host: "example.com",
            port: 80,
            default_port: 80,
            request_version: ProtocolVersion::HTTP_1_1,
            server_version: None,
            via_http_proxy: false,
        }
    }

    fn text(assembled: &AssembledHeaders) -> String {
        String::from_utf8(assembled.block.to_vec()).unwrap()
    }

    #[test]
    fn test_fresh_connection_defaults() {
        let req = Request::get("/index.html");
        let out = assemble_headers(&req, req.headers(), &ctx());
        assert_eq!(
            text(&out),
            format!(
                "GET /index.html HTTP/1.1\r\nHost: example.com\r\n\
                 Connection: Keep-Alive, TE\r\nTE: trailers\r\n\
                 User-Agent: {USER_AGENT}\r\n\r\n"
            )
        );
        assert_eq!(out.connection, "Keep-Alive");
    }

    #[test]
    fn test_known_1_1_server_sends_te_only() {
        let req = Request::get("/");
        let mut c = ctx();
        c.server_version = Some(ProtocolVersion::HTTP_1_1);
        let out = assemble_headers(&req, req.headers(), &c);
        assert!(text(&out).contains("\r\nConnection: TE\r\n"));
        assert_eq!(out.connection, "");
    }

    #[test]
    fn test_host_port_suffix() {
        let req = Request::get("/");
        let mut c = ctx();
        c.port = 8080;
        let out = assemble_headers(&req, req.headers(), &c);
        assert!(text(&out).contains("\r\nHost: example.com:8080\r\n"));

        let req = Request::get("/").with_header("Host", "virtual.test").unwrap();
        let out = assemble_headers(&req, req.headers(), &ctx());
        assert!(text(&out).contains("\r\nHost: virtual.test\r\n"));
    }

    #[test]
    fn test_plain_proxy_uses_absolute_form_and_proxy_connection() {
        let req = Request::get("/a b");
        let mut c = ctx();
        c.via_http_proxy = true;
        let out = assemble_headers(&req, req.headers(), &c);
        let s = text(&out);
        assert!(s.starts_with("GET http://example.com/a%20b HTTP/1.1\r\n"));
        assert!(s.contains("\r\nProxy-Connection: Keep-Alive\r\n"));
        assert!(s.contains("\r\nConnection: TE\r\n"));
    }

    #[test]
    fn test_keep_alive_forwarded_only_with_token() {
        let req = Request::get("/")
            .with_header("Keep-Alive", "300")
            .unwrap();
        let out = assemble_headers(&req, req.headers(), &ctx());
        assert!(text(&out).contains("\r\nKeep-Alive: 300\r\n"));

        let req = Request::get("/")
            .with_header("Keep-Alive", "300")
            .unwrap()
            .with_header("Connection", "close")
            .unwrap();
        let out = assemble_headers(&req, req.headers(), &ctx());
        assert!(!text(&out).contains("Keep-Alive: 300"));
        assert!(text(&out).contains("\r\nConnection: close, TE\r\n"));
        assert_eq!(out.connection, "close");
    }

    #[test]
    fn test_user_agent_and_te_merging() {
        let req = Request::get("/")
            .with_header("User-Agent", "agent/1.0")
            .unwrap()
            .with_header("TE", "deflate")
            .unwrap()
            .with_header("Upgrade", "websocket")
            .unwrap();
        let s = text(&assemble_headers(&req, req.headers(), &ctx()));
        assert!(s.contains(&format!("\r\nUser-Agent: agent/1.0 {USER_AGENT}\r\n")));
        assert!(s.contains("\r\nTE: trailers, deflate\r\n"));
        assert!(s.contains("\r\nConnection: Keep-Alive, TE, Upgrade\r\n"));
        assert!(s.contains("\r\nUpgrade: websocket\r\n"));
    }

    #[test]
    fn test_body_headers() {
        let req = Request::post("/", "hello")
            .with_header("Expect", "100-continue")
            .unwrap();
        let out = assemble_headers(&req, req.headers(), &ctx());
        let s = text(&out);
        assert!(s.contains("\r\nContent-type: application/octet-stream\r\n"));
        assert!(s.contains("\r\nContent-length: 5\r\n"));
        assert_eq!(out.expect, "100-continue");
    }

    #[test]
    fn test_expect_continue_stripped_without_body() {
        let req = Request::get("/")
            .with_header("Expect", "100-continue")
            .unwrap();
        let out = assemble_headers(&req, req.headers(), &ctx());
        assert!(!text(&out).contains("Expect"));
        assert_eq!(out.expect, "");
    }

    #[test]
    fn test_chunked_stream_has_no_length() {
        let (body, _writer) = RequestBody::channel(Some(10));
        let req = Request::post("/", body)
            .with_header("Transfer-Encoding", "chunked")
            .unwrap();
        let s = text(&assemble_headers(&req, req.headers(), &ctx()));
        assert!(!s.contains("Content-length"));
        assert!(s.contains("\r\nTransfer-Encoding: chunked\r\n"));
    }

    #[test]
    fn test_escape_unsafe_chars() {
        assert_eq!(escape_unsafe_chars("/plain?q=1"), "/plain?q=1");
        assert_eq!(escape_unsafe_chars("/a b\"c"), "/a%20b%22c");
        assert_eq!(escape_unsafe_chars("/é"), "/%C3%A9");
    }
}
