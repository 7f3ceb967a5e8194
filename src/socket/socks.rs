//! SOCKS 4a and 5 client handshakes.
//!
//! [`SocksConnector`] reaches the SOCKS server through another
//! [`SocketConnector`] and asks it to open a stream to the real target.
//! Name resolution of the target is left to the SOCKS server.

use crate::base::neterror::NetError;
use crate::socket::connectjob::{Connecting, SocketConnector};
use crate::socket::proxy::SocksConfig;
use crate::socket::stream::BoxedSocket;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS4_GRANTED: u8 = 0x5a;
const SOCKS5_NO_AUTH: u8 = 0x00;
const SOCKS5_SUCCEEDED: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

fn rejected(version: u8, code: u8) -> NetError {
    tracing::debug!(version, code, "SOCKS server refused the connection");
    NetError::SocksConnectionFailed
}

/// Map an I/O failure during the handshake. The SOCKS server was reached,
/// so anything that goes wrong afterwards is a SOCKS failure.
fn handshake_io(err: std::io::Error) -> NetError {
    tracing::debug!(error = %err, "SOCKS handshake I/O failed");
    NetError::SocksConnectionFailed
}

/// SOCKS 4, or 4a when `host` is not an IPv4 literal.
async fn socks4<S>(stream: &mut S, host: &str, port: u16) -> Result<(), NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (ip, named) = match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => (ip, false),
        Ok(IpAddr::V6(_)) => {
            tracing::debug!(host = %host, "SOCKS 4 cannot carry an IPv6 target");
            return Err(NetError::SocksConnectionFailed);
        }
        // 0.0.0.x with x != 0 announces a name after the user id.
        Err(_) => (Ipv4Addr::new(0, 0, 0, 1), true),
    };

    let mut request = vec![0x04, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip.octets());
    request.push(0x00);
    if named {
        request.extend_from_slice(host.as_bytes());
        request.push(0x00);
    }
    stream.write_all(&request).await.map_err(handshake_io)?;
    stream.flush().await.map_err(handshake_io)?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.map_err(handshake_io)?;
    if reply[1] != SOCKS4_GRANTED {
        return Err(rejected(4, reply[1]));
    }
    Ok(())
}

async fn socks5<S>(stream: &mut S, host: &str, port: u16) -> Result<(), NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&[0x05, 0x01, SOCKS5_NO_AUTH])
        .await
        .map_err(handshake_io)?;
    stream.flush().await.map_err(handshake_io)?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(handshake_io)?;
    if choice[0] != 0x05 || choice[1] != SOCKS5_NO_AUTH {
        tracing::debug!(method = choice[1], "SOCKS 5 server demands authentication");
        return Err(NetError::SocksConnectionFailed);
    }

    let mut request = vec![0x05, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len()).map_err(|_| NetError::InvalidUrl)?;
            request.push(ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(handshake_io)?;
    stream.flush().await.map_err(handshake_io)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(handshake_io)?;
    if reply[1] != SOCKS5_SUCCEEDED {
        return Err(rejected(5, reply[1]));
    }
    // Bound address and port; nothing here needs them.
    let rest = match reply[3] {
        ATYP_IPV4 => 4 + 2,
        ATYP_IPV6 => 16 + 2,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await.map_err(handshake_io)?;
            len[0] as usize + 2
        }
        other => {
            tracing::debug!(atyp = other, "bad SOCKS 5 address type");
            return Err(NetError::SocksConnectionFailed);
        }
    };
    let mut bound = vec![0u8; rest];
    stream.read_exact(&mut bound).await.map_err(handshake_io)?;
    Ok(())
}

/// Run the handshake for `version` (5 when unset) over `stream`.
pub async fn handshake<S>(stream: &mut S, version: Option<u8>, host: &str, port: u16) -> Result<(), NetError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match version.unwrap_or(5) {
        4 => socks4(stream, host, port).await,
        5 => socks5(stream, host, port).await,
        _ => Err(NetError::ProxyConfiguration),
    }
}

/// Opens every socket through a SOCKS server.
#[derive(Debug)]
pub struct SocksConnector {
    config: SocksConfig,
    upstream: Arc<dyn SocketConnector>,
}

impl SocksConnector {
    /// `upstream` reaches the SOCKS server itself.
    pub fn new(config: SocksConfig, upstream: Arc<dyn SocketConnector>) -> Self {
        Self { config, upstream }
    }
}

impl SocketConnector for SocksConnector {
    fn connect(&self, host: String, port: u16) -> Connecting {
        let server = self.upstream.connect(self.config.host.clone(), self.config.effective_port());
        let version = self.config.version;
        let via = format!("{}:{}", self.config.host, self.config.effective_port());
        Box::pin(async move {
            let mut socket: BoxedSocket = server.await?;
            handshake(&mut socket, version, &host, port).await?;
            tracing::debug!(socks = %via, target = %host, port, "SOCKS tunnel open");
            Ok(socket)
        })
    }
}
