//! Transport error types.

use std::io;

/// Transport layer errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address string could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Address binding failed
    #[error("failed to bind to {addr}: {reason}")]
    BindFailed {
        /// The address that could not be bound
        addr: String,
        /// The underlying failure
        reason: String,
    },

    /// Outbound connection failed
    #[error("connection to {addr} failed: {reason}")]
    ConnectFailed {
        /// The address that could not be reached
        addr: String,
        /// The underlying failure
        reason: String,
    },

    /// Inbound frame exceeded the size cap
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared frame length
        len: usize,
        /// The configured cap
        max: usize,
    },

    /// The stream was closed by the peer
    #[error("stream closed")]
    Closed,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
