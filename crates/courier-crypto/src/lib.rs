//! # COURIER Crypto
//!
//! Cryptographic primitives for the COURIER RPC layer.
//!
//! This crate provides:
//! - X25519 identity keypairs (a node's public key is its identity)
//! - The link handshake: an ephemeral/static triple Diffie-Hellman with
//!   BLAKE3 key derivation, mutually authenticating both peers
//! - `XChaCha20-Poly1305` session ciphers with counter-derived nonces
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | KDF | BLAKE3 derive_key | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod handshake;
pub mod keys;

pub use aead::{CipherState, SessionKeys};
pub use error::CryptoError;
pub use handshake::{ClientHandshake, ServerHandshake};
pub use keys::{Keypair, PublicKey, SecretKey};

/// X25519 public key size
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const SECRET_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 key size
pub const AEAD_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size
pub const AEAD_TAG_SIZE: usize = 16;
