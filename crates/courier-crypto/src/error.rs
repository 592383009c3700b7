//! Error types for COURIER cryptographic operations.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Handshake message has the wrong length
    #[error("handshake message too short: expected {expected}, got {actual}")]
    HandshakeTooShort {
        /// Expected message size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Peer presented a low-order public key
    #[error("low-order public key rejected")]
    LowOrderPoint,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptFailed,

    /// AEAD decryption or authentication failed
    #[error("decryption failed: bad key or corrupted ciphertext")]
    DecryptFailed,

    /// Send counter exhausted for this session
    #[error("nonce counter overflow")]
    NonceOverflow,

    /// Peer's READY confirmation did not verify
    #[error("ready confirmation mismatch")]
    ReadyMismatch,
}
