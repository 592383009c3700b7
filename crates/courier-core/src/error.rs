//! Error types for the COURIER core.
//!
//! Registration errors are synchronous `Err` returns to the registering
//! caller. Transport, handshake and dispatch errors never cross the proxy
//! boundary as panics; they surface as callback invocations or as
//! synthetic failure replies to the requesting peer. Timeouts are routine
//! outcomes delivered through the same callback channel as success.

use std::borrow::Cow;
use thiserror::Error;

use crate::connection::ConnectionId;

/// Errors that can occur in COURIER operations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Registration Errors ============
    /// Category or command name is empty or contains the target separator
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Category already registered
    #[error("duplicate category: {0}")]
    DuplicateCategory(String),

    /// Command already registered in its category
    #[error("duplicate command: {0}")]
    DuplicateCommand(String),

    /// Target string is not of the form `category.command`
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),

    // ============ Dispatch Errors ============
    /// No category with this name
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    /// No command with this name in the category
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Connection's auth level is below the command's minimum
    #[error("access denied")]
    AccessDenied,

    // ============ Connection Errors ============
    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// The address that could not be bound
        addr: String,
        /// The underlying failure
        reason: String,
    },

    /// Cryptographic handshake failed
    #[error("handshake failed: {0}")]
    Handshake(Cow<'static, str>),

    /// Outbound connection did not establish within its deadline
    #[error("connection timed out")]
    ConnectionTimeout,

    /// Connection id does not refer to a live connection
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// Connection closed while an operation was outstanding
    #[error("connection closed")]
    ConnectionClosed,

    // ============ Request Errors ============
    /// Request deadline elapsed without a reply
    #[error("request timed out")]
    RequestTimeout,

    // ============ Lifecycle Errors ============
    /// Operation requires the node to not be running
    #[error("already running")]
    AlreadyRunning,

    /// Operation requires the node to be running
    #[error("not running")]
    NotRunning,

    /// Node is draining and no longer accepts instructions
    #[error("shutting down")]
    ShuttingDown,

    // ============ Wrapped Errors ============
    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(#[from] courier_transport::TransportError),

    /// Cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] courier_crypto::CryptoError),
}

impl Error {
    /// Create a handshake error with static context (zero allocation)
    #[must_use]
    pub const fn handshake(context: &'static str) -> Self {
        Error::Handshake(Cow::Borrowed(context))
    }

    /// The sentinel frame a routing failure sends back to a requester, if
    /// this error is one of the three synthetic-reply cases.
    #[must_use]
    pub fn routing_sentinel(&self) -> Option<&'static [u8]> {
        match self {
            Error::UnknownCategory(_) => Some(crate::UNKNOWN_CATEGORY_SENTINEL),
            Error::UnknownCommand(_) => Some(crate::UNKNOWN_COMMAND_SENTINEL),
            Error::AccessDenied => Some(crate::ACCESS_DENIED_SENTINEL),
            _ => None,
        }
    }
}

/// Result type for COURIER operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_sentinels() {
        assert_eq!(
            Error::UnknownCategory("x".into()).routing_sentinel(),
            Some(&b"UNKNOWN_CATEGORY"[..])
        );
        assert_eq!(
            Error::UnknownCommand("x".into()).routing_sentinel(),
            Some(&b"UNKNOWN_COMMAND"[..])
        );
        assert_eq!(
            Error::AccessDenied.routing_sentinel(),
            Some(&b"ACCESS_DENIED"[..])
        );
        assert_eq!(Error::ConnectionTimeout.routing_sentinel(), None);
        assert_eq!(Error::RequestTimeout.routing_sentinel(), None);
    }

    #[test]
    fn test_display() {
        let err = Error::Bind {
            addr: "tcp://0.0.0.0:80".into(),
            reason: "permission denied".into(),
        };
        assert!(err.to_string().contains("tcp://0.0.0.0:80"));

        let err = Error::UnknownConnection(ConnectionId::new(17));
        assert!(err.to_string().contains("17"));
    }
}
