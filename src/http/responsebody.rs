//! Response body framing and decoding.

use crate::base::neterror::NetError;
use crate::http::head::ResponseHead;
use crate::http::headers::has_token;
use crate::socket::demux::Turn;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

impl BodyFraming {
    pub fn for_response(head: &ResponseHead, head_request: bool) -> Result<Self, NetError> {
        let status = head.status.as_u16();
        if head_request || head.status.is_informational() || status == 204 || status == 304 {
            return Ok(BodyFraming::Empty);
        }

        if let Some(te) = head.header_joined(TRANSFER_ENCODING.as_str()) {
            let last = te.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                return Ok(BodyFraming::Chunked);
            }
            if has_token(&te, "chunked") {
                return Err(NetError::InvalidResponse);
            }
            return Ok(BodyFraming::UntilClose);
        }

        let mut lengths = head
            .headers
            .get_all(CONTENT_LENGTH)
            .iter()
            .map(|v| {
                v.to_str()
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or(NetError::InvalidResponse)
            });
        match lengths.next() {
            None => Ok(BodyFraming::UntilClose),
            Some(first) => {
                let first = first?;
                for other in lengths {
                    if other? != first {
                        return Err(NetError::InvalidResponse);
                    }
                }
                Ok(if first == 0 {
                    BodyFraming::Empty
                } else {
                    BodyFraming::Length(first)
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Length(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailers,
    UntilClose,
    Done,
}

/// Incremental body reader over a socket turn.
#[derive(Debug)]
pub struct BodyDecoder {
    state: DecodeState,
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, NetError> {
    let line = std::str::from_utf8(line).map_err(|_| NetError::InvalidChunkedEncoding)?;
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || size.len() > 16 {
        return Err(NetError::InvalidChunkedEncoding);
    }
    u64::from_str_radix(size, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

impl BodyDecoder {
    pub fn new(framing: BodyFraming) -> Self {
        let state = match framing {
            BodyFraming::Empty => DecodeState::Done,
            BodyFraming::Length(n) => DecodeState::Length(n),
            BodyFraming::Chunked => DecodeState::ChunkSize,
            BodyFraming::UntilClose => DecodeState::UntilClose,
        };
        Self { state }
    }

    pub fn is_done(&self) -> bool {
        self.state == DecodeState::Done
    }

    async fn take(turn: &mut Turn, remaining: u64, eof_error: NetError) -> Result<Bytes, NetError> {
        if turn.buf.is_empty() && turn.fill().await? == 0 {
            return Err(eof_error);
        }
        let n = turn.buf.len().min(remaining.min(usize::MAX as u64) as usize);
        Ok(turn.buf.split_to(n).freeze())
    }

    /// Next piece of body, or `None` once the body is complete.
    pub async fn next_chunk(&mut self, turn: &mut Turn) -> Result<Option<Bytes>, NetError> {
        loop {
            match self.state {
                DecodeState::Done => return Ok(None),
                DecodeState::Length(0) => self.state = DecodeState::Done,
                DecodeState::Length(remaining) => {
                    let data = Self::take(turn, remaining, NetError::ContentLengthMismatch).await?;
                    self.state = DecodeState::Length(remaining - data.len() as u64);
                    return Ok(Some(data));
                }
                DecodeState::ChunkSize => {
                    let line = turn
                        .read_line()
                        .await?
                        .ok_or(NetError::IncompleteChunkedEncoding)?;
                    self.state = match parse_chunk_size(&line)? {
                        0 => DecodeState::Trailers,
                        n => DecodeState::ChunkData(n),
                    };
                }
                DecodeState::ChunkData(remaining) => {
                    let data =
                        Self::take(turn, remaining, NetError::IncompleteChunkedEncoding).await?;
                    let left = remaining - data.len() as u64;
                    self.state = if left == 0 {
                        DecodeState::ChunkDataEnd
                    } else {
                        DecodeState::ChunkData(left)
                    };
                    return Ok(Some(data));
                }
                DecodeState::ChunkDataEnd => {
                    let line = turn
                        .read_line()
                        .await?
                        .ok_or(NetError::IncompleteChunkedEncoding)?;
                    if !line.is_empty() {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    self.state = DecodeState::ChunkSize;
                }
                DecodeState::Trailers => {
                    let line = turn
                        .read_line()
                        .await?
                        .ok_or(NetError::IncompleteChunkedEncoding)?;
                    if line.is_empty() {
                        self.state = DecodeState::Done;
                    }
                }
                DecodeState::UntilClose => {
                    if turn.buf.is_empty() && turn.fill().await? == 0 {
                        self.state = DecodeState::Done;
                        continue;
                    }
                    let data = turn.buf.split().freeze();
                    return Ok(Some(data));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::version::ProtocolVersion;
    use crate::socket::stream::BoxedSocket;
    use bytes::BytesMut;
    use http::StatusCode;
    use tokio::io::AsyncWriteExt;

    async fn turn_with(data: &'static [u8]) -> Turn {
        let (client, mut server) = tokio::io::duplex(4096);
        server.write_all(data).await.unwrap();
        drop(server);
        let (read, _write) = tokio::io::split(BoxedSocket::new(client));
        Turn::detached(read)
    }

    async fn collect(decoder: &mut BodyDecoder, turn: &mut Turn) -> Result<BytesMut, NetError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = decoder.next_chunk(turn).await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn head(status: u16, headers: &[(&'static str, &'static str)]) -> ResponseHead {
        let mut head = ResponseHead::new(
            ProtocolVersion::HTTP_1_1,
            StatusCode::from_u16(status).unwrap(),
        );
        for (name, value) in headers {
            head.headers.append(*name, value.parse().unwrap());
        }
        head
    }

    #[test]
    fn test_framing_rules() {
        assert_eq!(
            BodyFraming::for_response(&head(200, &[("content-length", "10")]), true).unwrap(),
            BodyFraming::Empty
        );
        assert_eq!(
            BodyFraming::for_response(&head(304, &[("content-length", "10")]), false).unwrap(),
            BodyFraming::Empty
        );
        assert_eq!(
            BodyFraming::for_response(
                &head(200, &[("transfer-encoding", "gzip, chunked"), ("content-length", "3")]),
                false
            )
            .unwrap(),
            BodyFraming::Chunked
        );
        assert_eq!(
            BodyFraming::for_response(&head(200, &[("content-length", "10")]), false).unwrap(),
            BodyFraming::Length(10)
        );
        assert_eq!(
            BodyFraming::for_response(&head(200, &[]), false).unwrap(),
            BodyFraming::UntilClose
        );
    }

    #[test]
    fn test_conflicting_lengths_rejected() {
        let h = head(200, &[("content-length", "3"), ("content-length", "4")]);
        assert_eq!(
            BodyFraming::for_response(&h, false).err(),
            Some(NetError::InvalidResponse)
        );
    }

    #[tokio::test]
    async fn test_length_body_leaves_next_response() {
        let mut turn = turn_with(b"helloHTTP/1.1").await;
        let mut decoder = BodyDecoder::new(BodyFraming::Length(5));
        assert_eq!(&collect(&mut decoder, &mut turn).await.unwrap()[..], b"hello");
        assert_eq!(&turn.buf[..], b"HTTP/1.1");
    }

    #[tokio::test]
    async fn test_length_body_truncated() {
        let mut turn = turn_with(b"hel").await;
        let mut decoder = BodyDecoder::new(BodyFraming::Length(5));
        assert_eq!(
            collect(&mut decoder, &mut turn).await.err(),
            Some(NetError::ContentLengthMismatch)
        );
    }

    #[tokio::test]
    async fn test_chunked_body_with_trailers() {
        let mut turn =
            turn_with(b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: 1\r\n\r\nnext").await;
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        assert_eq!(
            &collect(&mut decoder, &mut turn).await.unwrap()[..],
            b"Wikipedia"
        );
        assert!(decoder.is_done());
        assert_eq!(&turn.buf[..], b"next");
    }

    #[tokio::test]
    async fn test_chunked_body_errors() {
        let mut turn = turn_with(b"zz\r\n").await;
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        assert_eq!(
            collect(&mut decoder, &mut turn).await.err(),
            Some(NetError::InvalidChunkedEncoding)
        );

        let mut turn = turn_with(b"5\r\nab").await;
        let mut decoder = BodyDecoder::new(BodyFraming::Chunked);
        assert_eq!(
            collect(&mut decoder, &mut turn).await.err(),
            Some(NetError::IncompleteChunkedEncoding)
        );
    }

    #[tokio::test]
    async fn test_until_close() {
        let mut turn = turn_with(b"all of it").await;
        let mut decoder = BodyDecoder::new(BodyFraming::UntilClose);
        assert_eq!(
            &collect(&mut decoder, &mut turn).await.unwrap()[..],
            b"all of it"
        );
        assert!(turn.is_eof());
    }
}
