//! # Client Errors
//!
//! Purpose: One error type for every failure the client can surface, split so
//! callers (and the pool) can tell a broken connection from a failed command.

use bytes::Bytes;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Framing violations detected while reading a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Leading byte is not one of `+ - : $ *`.
    #[error("unknown reply type: 0x{0:02x}")]
    UnknownReplyType(u8),
    /// A CR was not immediately followed by LF.
    #[error("CR not followed by LF")]
    MissingLineFeed,
    /// Stream ended before the reply was complete.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// Integer, length or count field is not a decimal i64.
    #[error("invalid integer field")]
    InvalidInteger,
    /// Bulk payload was not followed by exactly CR LF.
    #[error("bulk length does not match payload")]
    BulkTerminator,
    /// Declared bulk length exceeds the accepted maximum.
    #[error("bulk length {0} exceeds limit")]
    BulkTooLarge(i64),
}

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Server returned an error reply. The message is the raw line.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Bytes },
    /// Keyword argument is not a known protocol modifier.
    #[error("unknown keyword argument: {0}")]
    UnknownKeyword(String),
    /// Argument cannot be encoded, or the arity is wrong.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// No connection became available within the borrow timeout.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
    /// The pool has been shut down.
    #[error("connection pool is closed")]
    PoolClosed,
    /// Host and port do not resolve to a socket address.
    #[error("invalid address")]
    InvalidAddress,
    /// A subscription received a push for a channel it did not subscribe to.
    #[error("subscription out of sync: expected channel {expected}, got {actual}")]
    OutOfSync { expected: String, actual: String },
    /// Configuration value is missing or malformed.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true when the connection that produced this error must not be
    /// reused.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::OutOfSync { .. }
        )
    }
}

/// True for the kinds a socket read/write timeout surfaces as.
pub(crate) fn is_timeout_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_keep_the_connection() {
        let err = ClientError::Server {
            message: Bytes::from_static(b"ERR wrong type"),
        };
        assert!(!err.is_fatal());
        assert!(!ClientError::UnknownKeyword("foo".into()).is_fatal());
    }

    #[test]
    fn framing_errors_are_fatal() {
        assert!(ClientError::from(ProtocolError::MissingLineFeed).is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(ClientError::from(io).is_fatal());
    }

    #[test]
    fn detects_socket_timeouts() {
        assert!(is_timeout_kind(std::io::ErrorKind::WouldBlock));
        assert!(is_timeout_kind(std::io::ErrorKind::TimedOut));
        assert!(!is_timeout_kind(std::io::ErrorKind::ConnectionReset));
    }
}
