use std::io;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum NetError {
    // Request Errors
    #[error("Request aborted by user")]
    Aborted,

    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("Address invalid")]
    AddressInvalid,
    #[error("Address unreachable")]
    AddressUnreachable,
    #[error("Tunnel connection failed")]
    TunnelConnectionFailed,
    #[error("Connection timed out")]
    ConnectionTimedOut,
    #[error("SOCKS connection failed")]
    SocksConnectionFailed,
    #[error("Address in use")]
    AddressInUse,

    // HTTP Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Unknown URL scheme")]
    UnknownUrlScheme,
    #[error("Invalid response")]
    InvalidResponse,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Content length mismatch")]
    ContentLengthMismatch,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,

    // Crate-specific errors, numbered from -10000
    #[error("Invalid header")]
    InvalidHeader,
    #[error("Module returned an outcome it could not satisfy")]
    InvalidModuleOutcome,
    #[error("Too many module restarts")]
    TooManyModuleRestarts,
    #[error("No TLS connector configured for https")]
    TlsUnavailable,
    #[error("Invalid proxy configuration")]
    ProxyConfiguration,
    #[error("Invalid non-proxy entry")]
    InvalidNonProxyEntry,
    #[error("Body writer already used")]
    BodyAlreadyConsumed,
    #[error("Invalid UTF-8 in response body")]
    InvalidUtf8,
    #[error("JSON parse error")]
    JsonParseError,
    #[error("Invalid client configuration")]
    InvalidConfiguration,

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::Aborted => -3,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed => -104,
            NetError::NameNotResolved => -105,
            NetError::AddressInvalid => -108,
            NetError::AddressUnreachable => -109,
            NetError::TunnelConnectionFailed => -111,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,
            NetError::SocksConnectionFailed => -120,
            NetError::AddressInUse => -147,
            NetError::InvalidUrl => -300,
            NetError::UnknownUrlScheme => -302,
            NetError::InvalidResponse => -320,
            NetError::InvalidChunkedEncoding => -321,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::InvalidHeader => -10000,
            NetError::InvalidModuleOutcome => -10001,
            NetError::TooManyModuleRestarts => -10002,
            NetError::TlsUnavailable => -10003,
            NetError::ProxyConfiguration => -10004,
            NetError::InvalidNonProxyEntry => -10005,
            NetError::BodyAlreadyConsumed => -10006,
            NetError::InvalidUtf8 => -10007,
            NetError::JsonParseError => -10008,
            NetError::InvalidConfiguration => -10009,
            NetError::Unknown(code) => *code,
        }
    }

    /// The endpoint itself is unreachable: unknown host, refused, no route
    /// or an establishment timeout. Sends failing this way are never retried.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            NetError::NameNotResolved
                | NetError::ConnectionRefused
                | NetError::AddressUnreachable
                | NetError::ConnectionTimedOut
                | NetError::SocksConnectionFailed
        )
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -3 => NetError::Aborted,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -108 => NetError::AddressInvalid,
            -109 => NetError::AddressUnreachable,
            -111 => NetError::TunnelConnectionFailed,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -120 => NetError::SocksConnectionFailed,
            -147 => NetError::AddressInUse,
            -300 => NetError::InvalidUrl,
            -302 => NetError::UnknownUrlScheme,
            -320 => NetError::InvalidResponse,
            -321 => NetError::InvalidChunkedEncoding,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,
            -10000 => NetError::InvalidHeader,
            -10001 => NetError::InvalidModuleOutcome,
            -10002 => NetError::TooManyModuleRestarts,
            -10003 => NetError::TlsUnavailable,
            -10004 => NetError::ProxyConfiguration,
            -10005 => NetError::InvalidNonProxyEntry,
            -10006 => NetError::BodyAlreadyConsumed,
            -10007 => NetError::InvalidUtf8,
            -10008 => NetError::JsonParseError,
            -10009 => NetError::InvalidConfiguration,
            _ => NetError::Unknown(code),
        }
    }
}

impl From<io::Error> for NetError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            io::ErrorKind::ConnectionReset => NetError::ConnectionReset,
            io::ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            io::ErrorKind::NotConnected => NetError::SocketNotConnected,
            io::ErrorKind::BrokenPipe => NetError::ConnectionReset,
            io::ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            io::ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            io::ErrorKind::AddrInUse => NetError::AddressInUse,
            io::ErrorKind::AddrNotAvailable => NetError::AddressInvalid,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                NetError::AddressUnreachable
            }
            _ => NetError::ConnectionFailed,
        }
    }
}
