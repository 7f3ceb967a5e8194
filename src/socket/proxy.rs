use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use zeroize::Zeroizing;

/// Port used for an HTTP proxy when none (or 0) is given.
pub const DEFAULT_PROXY_PORT: u16 = 80;
/// Port used for a SOCKS server when none (or 0) is given.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;

/// Address of an HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    /// Port 0 selects [`DEFAULT_PROXY_PORT`].
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().trim().to_ascii_lowercase(),
            port: if port == 0 { DEFAULT_PROXY_PORT } else { port },
        }
    }

    /// Parse `http://host:port`, `host:port` or a bare host.
    pub fn parse(value: &str) -> Result<Self, NetError> {
        let value = value.trim();
        if value.contains("://") {
            let url = Url::parse(value).map_err(|_| NetError::ProxyConfiguration)?;
            let host = url.host_str().ok_or(NetError::ProxyConfiguration)?;
            return Ok(Self::new(host, url.port().unwrap_or(0)));
        }
        match value.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                let port = port.parse().map_err(|_| NetError::ProxyConfiguration)?;
                Ok(Self::new(host, port))
            }
            _ if value.is_empty() => Err(NetError::ProxyConfiguration),
            _ => Ok(Self::new(value, 0)),
        }
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// HTTP proxy configuration, optionally with Basic credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Add authentication credentials.
    pub fn with_auth(mut self, user: &str, pass: &str) -> Self {
        self.username = Some(user.to_string());
        self.password = Some(pass.to_string());
        self
    }

    pub fn addr(&self) -> ProxyAddr {
        ProxyAddr::new(self.host.clone(), self.port)
    }

    /// Credentials held in memory that is wiped on drop.
    pub fn credentials(&self) -> Option<ProxyCredentials> {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => Some(ProxyCredentials {
                username: u.clone(),
                password: Zeroizing::new(p.clone()),
            }),
            _ => None,
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Proxy user name and password.
#[derive(Clone)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl ProxyCredentials {
    /// `Proxy-Authorization` header value.
    pub fn auth_header(&self) -> String {
        use base64::{engine::general_purpose, Engine as _};
        let creds = Zeroizing::new(format!("{}:{}", self.username, self.password.as_str()));
        format!("Basic {}", general_purpose::STANDARD.encode(creds.as_bytes()))
    }
}

impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// SOCKS server settings, used by [`SocksConnector`](super::socks::SocksConnector).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocksConfig {
    pub host: String,
    pub port: u16,
    /// 4 or 5; `None` means 5.
    pub version: Option<u8>,
}

impl SocksConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            version: None,
        }
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SOCKS_PORT
        } else {
            self.port
        }
    }

    pub fn validate(&self) -> Result<(), NetError> {
        if self.host.trim().is_empty() {
            return Err(NetError::ProxyConfiguration);
        }
        match self.version {
            None | Some(4) | Some(5) => Ok(()),
            Some(v) => {
                tracing::warn!(version = v, "unsupported SOCKS version");
                Err(NetError::ProxyConfiguration)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_addr_parse() {
        assert_eq!(
            ProxyAddr::parse("http://Proxy.Local:3128").unwrap(),
            ProxyAddr::new("proxy.local", 3128)
        );
        assert_eq!(
            ProxyAddr::parse("proxy.local:8080").unwrap(),
            ProxyAddr::new("proxy.local", 8080)
        );
        assert_eq!(ProxyAddr::parse("proxy.local").unwrap().port, 80);
        assert!(ProxyAddr::parse("").is_err());
        assert!(ProxyAddr::parse("proxy:notaport").is_err());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(ProxyAddr::new("p", 0).port, DEFAULT_PROXY_PORT);
        assert_eq!(SocksConfig::new("s", 0).effective_port(), DEFAULT_SOCKS_PORT);
    }

    #[test]
    fn test_auth_header() {
        let cfg = ProxyConfig::new("proxy", 8080).with_auth("user", "pass");
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.auth_header(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = ProxyConfig::new("proxy", 8080).with_auth("user", "secret");
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("secret"));
        let dbg = format!("{:?}", cfg.credentials().unwrap());
        assert!(!dbg.contains("secret"));
    }

    #[test]
    fn test_socks_version_validation() {
        let mut socks = SocksConfig::new("socks.local", 1080);
        assert!(socks.validate().is_ok());
        socks.version = Some(5);
        assert!(socks.validate().is_ok());
        socks.version = Some(6);
        assert_eq!(socks.validate(), Err(NetError::ProxyConfiguration));
    }
}
