//! Response status line and header block.

use crate::base::neterror::NetError;
use crate::http::version::ProtocolVersion;
use crate::socket::demux::Turn;
use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

const MAX_HEADERS: usize = 100;
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: ProtocolVersion,
    pub status: StatusCode,
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(version: ProtocolVersion, status: StatusCode) -> Self {
        Self {
            version,
            status,
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// First value of `name` as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of `name` joined by `, `.
    pub fn header_joined(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// Parse a status line plus header lines (CRLF separated, no final
    /// blank line required).
    pub fn parse(status_line: &str, header_block: &[u8]) -> Result<Self, NetError> {
        let (version, rest) = status_line
            .split_once(' ')
            .ok_or(NetError::InvalidResponse)?;
        let version = ProtocolVersion::parse(version)?;

        let rest = rest.trim_start();
        let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NetError::InvalidResponse);
        }
        let status = code
            .parse::<u16>()
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or(NetError::InvalidResponse)?;

        Ok(Self {
            version,
            status,
            reason: reason.trim().to_string(),
            headers: parse_header_block(header_block)?,
        })
    }
}

fn parse_header_block(block: &[u8]) -> Result<HeaderMap, NetError> {
    let mut map = HeaderMap::new();
    if block.is_empty() {
        return Ok(map);
    }
    let mut terminated = BytesMut::with_capacity(block.len() + 4);
    terminated.extend_from_slice(block);
    terminated.extend_from_slice(b"\r\n\r\n");

    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let parsed = match httparse::parse_headers(&terminated, &mut raw) {
        Ok(httparse::Status::Complete((_, parsed))) => parsed,
        Ok(httparse::Status::Partial) => return Err(NetError::InvalidResponse),
        Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
        Err(_) => return Err(NetError::InvalidHeader),
    };
    for header in parsed {
        let name =
            HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| NetError::InvalidHeader)?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| NetError::InvalidHeader)?;
        map.append(name, value);
    }
    Ok(map)
}

fn head_complete(buf: &[u8]) -> bool {
    let Some(start) = buf.iter().position(|b| !matches!(b, b'\r' | b'\n')) else {
        return false;
    };
    let buf = &buf[start..];
    let mut from = 0;
    while let Some(pos) = buf[from..].iter().position(|&b| b == b'\n') {
        let rest = &buf[from + pos + 1..];
        if rest.starts_with(b"\n") || rest.starts_with(b"\r\n") {
            return true;
        }
        from += pos + 1;
    }
    false
}

/// Fill the buffer until it holds a complete head or the peer closes.
///
/// Cancel safe: nothing is consumed.
pub async fn fill_head(turn: &mut Turn) -> Result<(), NetError> {
    loop {
        if head_complete(&turn.buf) {
            return Ok(());
        }
        if turn.buf.len() > MAX_HEAD_SIZE {
            return Err(NetError::ResponseHeadersTooBig);
        }
        if turn.fill().await? == 0 {
            return Ok(());
        }
    }
}

/// Read one response head from the socket.
///
/// Blank lines ahead of the status line are skipped. Folded header lines are
/// joined to the previous line.
pub async fn read_head(turn: &mut Turn) -> Result<ResponseHead, NetError> {
    fill_head(turn).await?;
    let status_line = loop {
        match turn.read_line().await? {
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
            None => return Err(NetError::EmptyResponse),
        }
    };
    let status_line = std::str::from_utf8(&status_line).map_err(|_| NetError::InvalidResponse)?;

    let mut block = BytesMut::new();
    loop {
        let line = turn.read_line().await?.ok_or(NetError::ConnectionClosed)?;
        if line.is_empty() {
            break;
        }
        if matches!(line[0], b' ' | b'\t') && !block.is_empty() {
            block.extend_from_slice(b" ");
            let start = line
                .iter()
                .position(|b| !matches!(b, b' ' | b'\t'))
                .unwrap_or(line.len());
            block.extend_from_slice(&line[start..]);
        } else {
            if !block.is_empty() {
                block.extend_from_slice(b"\r\n");
            }
            block.extend_from_slice(&line);
        }
        if block.len() > MAX_HEAD_SIZE {
            return Err(NetError::ResponseHeadersTooBig);
        }
    }

    let head = ResponseHead::parse(status_line, &block)?;
    tracing::trace!(status = head.status.as_u16(), version = %head.version, "response head");
    Ok(head)
}
