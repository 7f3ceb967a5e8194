//! Loopback servers and scripted sockets shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use std::future::Future;
use tokio::net::{TcpListener, TcpStream};

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Index of the accepted connection it arrived on.
    pub conn: usize,
    pub head: String,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim()
                .eq_ignore_ascii_case(name)
                .then(|| v.trim().to_string())
        })
    }
}

/// What the server does after a request.
pub enum Reply {
    /// Write the bytes and keep reading requests.
    Keep(Vec<u8>),
    /// Write the bytes and close.
    Close(Vec<u8>),
    /// Write nothing and keep the socket open.
    Silent,
}

pub fn ok(body: &str) -> Vec<u8> {
    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
}

fn find(buf: &[u8], needle: &[u8]) -> Option<usize> {
    buf.windows(needle.len()).position(|w| w == needle)
}

async fn fill<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> bool {
    let mut tmp = [0u8; 4096];
    match stream.read(&mut tmp).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&tmp[..n]);
            true
        }
    }
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>) -> Option<String> {
    loop {
        if let Some(pos) = find(buf, b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..pos]).to_string();
            buf.drain(..pos + 2);
            return Some(line);
        }
        if !fill(stream, buf).await {
            return None;
        }
    }
}

async fn read_exact<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, len: usize) -> Option<Vec<u8>> {
    while buf.len() < len {
        if !fill(stream, buf).await {
            return None;
        }
    }
    Some(buf.drain(..len).collect())
}

/// Read a request head, leaving its body unread.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, conn: usize) -> Option<Captured> {
    let head_end = loop {
        if let Some(pos) = find(buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if !fill(stream, buf).await {
            return None;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    buf.drain(..head_end);
    Some(Captured {
        conn,
        head,
        body: Vec::new(),
    })
}

/// Read the Content-Length or chunked body announced by `captured`.
pub async fn read_body<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, captured: &mut Captured) -> Option<()> {
    if let Some(len) = captured.header("content-length") {
        let len: usize = len.parse().ok()?;
        captured.body = read_exact(stream, buf, len).await?;
    } else if captured
        .header("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    {
        loop {
            let size = read_line(stream, buf).await?;
            let size = usize::from_str_radix(size.split(';').next()?.trim(), 16).ok()?;
            if size == 0 {
                while !read_line(stream, buf).await?.is_empty() {}
                break;
            }
            let data = read_exact(stream, buf, size).await?;
            captured.body.extend_from_slice(&data);
            read_exact(stream, buf, 2).await?;
        }
    }
    Some(())
}

/// Read one request (head plus Content-Length or chunked body). `buf`
/// carries pipelined bytes over between calls.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut Vec<u8>, conn: usize) -> Option<Captured> {
    let mut captured = read_head(stream, buf, conn).await?;
    read_body(stream, buf, &mut captured).await?;
    Some(captured)
}

pub type Log = Arc<Mutex<Vec<Captured>>>;

/// Serve `stream` until `respond` closes it or the peer goes away.
pub async fn serve_stream<S, F>(mut stream: S, conn: usize, log: Log, respond: Arc<F>)
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let mut buf = Vec::new();
    while let Some(req) = read_request(&mut stream, &mut buf, conn).await {
        log.lock().unwrap().push(req.clone());
        match respond(&req) {
            Reply::Keep(bytes) => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::Close(bytes) => {
                let _ = stream.write_all(&bytes).await;
                let _ = stream.shutdown().await;
                return;
            }
            Reply::Silent => {}
        }
    }
}

/// A loopback HTTP server answering every request with `respond`.
pub async fn spawn_server<F>(respond: F) -> (SocketAddr, Log)
where
    F: Fn(&Captured) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::default();
    let respond = Arc::new(respond);
    let server_log = log.clone();
    tokio::spawn(async move {
        let mut conn = 0;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_stream(stream, conn, server_log.clone(), respond.clone()));
            conn += 1;
        }
    });
    (addr, log)
}

/// A loopback server that hands every accepted socket to `handle`, for
/// tests that need to script the server byte by byte.
pub async fn spawn_raw_server<F, Fut>(handle: F) -> (SocketAddr, Log)
where
    F: Fn(TcpStream, usize, Log) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Log = Arc::default();
    let server_log = log.clone();
    tokio::spawn(async move {
        let mut conn = 0;
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle(stream, conn, server_log.clone()));
            conn += 1;
        }
    });
    (addr, log)
}

pub fn captured(log: &Log) -> Vec<Captured> {
    log.lock().unwrap().clone()
}

/// Connection index of every request seen so far.
pub fn connections(log: &Log) -> Vec<usize> {
    captured(log).iter().map(|c| c.conn).collect()
}
