//! Socket acquisition failures: timeouts, refusals and the retry bound,
//! driven through scripted connectors.

use pipenet::http::Request;
use pipenet::socket::{BoxedSocket, Connecting, SocketConnector};
use pipenet::{Client, NetError, Scheme};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
enum Script {
    /// Hand out sockets whose peer is already gone.
    DeadPeer,
    /// Never finish connecting.
    Hang,
    /// Connect, but only after the delay.
    Late(Duration),
    Refuse,
}

#[derive(Debug)]
struct Scripted {
    script: Script,
    connects: AtomicUsize,
    peers: Mutex<Option<mpsc::UnboundedSender<DuplexStream>>>,
}

impl Scripted {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            connects: AtomicUsize::new(0),
            peers: Mutex::new(None),
        })
    }

    fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl SocketConnector for Scripted {
    fn connect(&self, _host: String, _port: u16) -> Connecting {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::DeadPeer => {
                let (client, server) = tokio::io::duplex(1024);
                drop(server);
                Box::pin(async move { Ok(BoxedSocket::new(client)) })
            }
            Script::Hang => Box::pin(futures::future::pending()),
            Script::Late(delay) => {
                let peers = self.peers.lock().unwrap().clone();
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    let (client, server) = tokio::io::duplex(1024);
                    if let Some(peers) = peers {
                        let _ = peers.send(server);
                    }
                    Ok(BoxedSocket::new(client))
                })
            }
            Script::Refuse => Box::pin(async { Err(NetError::ConnectionRefused) }),
        }
    }
}

fn client_with(connector: Arc<Scripted>) -> Client {
    Client::builder().connector(connector).build().unwrap()
}

#[tokio::test]
async fn test_transient_write_failure_retried_three_times() {
    let connector = Scripted::new(Script::DeadPeer);
    let conn = client_with(connector.clone()).connect(Scheme::Http, "origin.test", 80);

    let err = conn.send(Request::get("/")).await.unwrap_err();
    assert_eq!(err, NetError::ConnectionReset);
    assert_eq!(connector.connects(), 3);
}

#[tokio::test]
async fn test_aborted_request_is_not_attempted() {
    let connector = Scripted::new(Script::DeadPeer);
    let conn = client_with(connector.clone()).connect(Scheme::Http, "origin.test", 80);

    let req = Request::get("/");
    req.abort_handle().abort();
    assert_eq!(conn.send(req).await.err(), Some(NetError::Aborted));
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn test_connect_failure_not_retried() {
    let connector = Scripted::new(Script::Refuse);
    let conn = client_with(connector.clone()).connect(Scheme::Http, "origin.test", 80);

    assert_eq!(
        conn.send(Request::get("/")).await.err(),
        Some(NetError::ConnectionRefused)
    );
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_connect_timeout() {
    let connector = Scripted::new(Script::Hang);
    let conn = client_with(connector.clone()).connect(Scheme::Http, "origin.test", 80);

    let result = conn
        .send_with_timeout(Request::get("/"), Some(Duration::from_millis(50)))
        .await;
    assert_eq!(result.err(), Some(NetError::ConnectionTimedOut));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn test_late_socket_is_closed_not_adopted() {
    let connector = Scripted::new(Script::Late(Duration::from_millis(150)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    *connector.peers.lock().unwrap() = Some(tx);
    let conn = client_with(connector.clone()).connect(Scheme::Http, "origin.test", 80);
    conn.set_timeout(Some(Duration::from_millis(30)));

    assert_eq!(
        conn.send(Request::get("/")).await.err(),
        Some(NetError::ConnectionTimedOut)
    );

    let mut server = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("connect never completed")
        .unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), server.read(&mut buf))
        .await
        .expect("late socket left open")
        .unwrap();
    assert_eq!(n, 0, "late socket should be closed without any request");
}

#[tokio::test]
async fn test_https_without_tls_connector() {
    let connector = Scripted::new(Script::DeadPeer);
    let conn = client_with(connector.clone()).connect(Scheme::Https, "origin.test", 0);
    assert_eq!(conn.port(), 443);

    assert_eq!(
        conn.send(Request::get("/")).await.err(),
        Some(NetError::TlsUnavailable)
    );
    assert_eq!(connector.connects(), 0);
}
