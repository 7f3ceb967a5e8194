//! Retry policy for sends that fail mid-exchange.
//!
//! A reused keep-alive socket may have been closed by the peer without us
//! noticing until the write fails. Such failures are retried on a fresh
//! socket; failures to reach the endpoint at all are not.

use crate::base::neterror::NetError;

/// Total attempts per send, the first one included.
pub const MAX_SEND_ATTEMPTS: usize = 3;

/// Reasons for retrying a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Server closed connection unexpectedly
    ConnectionReset,
    /// Connection was closed during request
    ConnectionClosed,
    /// Connection was aborted
    ConnectionAborted,
    /// Generic connection failure
    ConnectionFailed,
    /// Socket not connected
    SocketNotConnected,
    /// Empty response received
    EmptyResponse,
}

impl RetryReason {
    /// Map a NetError to a RetryReason, if the error is retryable.
    pub fn from_error(error: &NetError) -> Option<Self> {
        match error {
            NetError::ConnectionReset => Some(Self::ConnectionReset),
            NetError::ConnectionClosed => Some(Self::ConnectionClosed),
            NetError::ConnectionAborted => Some(Self::ConnectionAborted),
            NetError::ConnectionFailed => Some(Self::ConnectionFailed),
            NetError::SocketNotConnected => Some(Self::SocketNotConnected),
            NetError::EmptyResponse => Some(Self::EmptyResponse),
            _ => None,
        }
    }
}

/// Whether a send that failed with `error` on attempt number `attempt`
/// (1-based) should be tried again.
pub fn should_retry(error: &NetError, attempt: usize, aborted: bool) -> Option<RetryReason> {
    if aborted || attempt >= MAX_SEND_ATTEMPTS || error.is_connect_failure() {
        return None;
    }
    RetryReason::from_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_retry() {
        assert_eq!(
            should_retry(&NetError::ConnectionReset, 1, false),
            Some(RetryReason::ConnectionReset)
        );
        assert_eq!(
            should_retry(&NetError::ConnectionClosed, 2, false),
            Some(RetryReason::ConnectionClosed)
        );
    }

    #[test]
    fn test_attempts_bounded() {
        assert!(should_retry(&NetError::ConnectionReset, MAX_SEND_ATTEMPTS, false).is_none());
    }

    #[test]
    fn test_connect_failures_not_retried() {
        for err in [
            NetError::NameNotResolved,
            NetError::ConnectionRefused,
            NetError::AddressUnreachable,
            NetError::ConnectionTimedOut,
        ] {
            assert!(should_retry(&err, 1, false).is_none(), "{err:?}");
        }
    }

    #[test]
    fn test_abort_not_retried() {
        assert!(should_retry(&NetError::ConnectionReset, 1, true).is_none());
        assert!(should_retry(&NetError::Aborted, 1, false).is_none());
    }

    #[test]
    fn test_protocol_violations_not_retried() {
        assert!(should_retry(&NetError::InvalidResponse, 1, false).is_none());
        assert!(should_retry(&NetError::InvalidHeader, 1, false).is_none());
    }
}
