//! Ergonomic error context helpers.
//!
//! Provides extension traits that convert IO errors into `NetError` codes
//! while recording the endpoint involved in a structured trace event.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Map a connect-phase IO error, tracing the endpoint it concerns.
    ///
    /// # Example
    /// ```ignore
    /// use pipenet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("example.com", 443)?;
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Map an IO error raised while exchanging bytes on an open socket.
    fn transfer_context(self, host: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(host = %host, port, error = %e, "connect failed");
            NetError::from(e)
        })
    }

    fn transfer_context(self, host: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(host = %host, error = %e, "socket i/o failed");
            NetError::from(e)
        })
    }
}
