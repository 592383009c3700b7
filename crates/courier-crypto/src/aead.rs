//! Session encryption state for post-handshake link traffic.
//!
//! Each link direction gets its own `CipherState`: an XChaCha20-Poly1305
//! key plus a nonce salt and a message counter. Links run over an ordered
//! transport, so both ends of a direction advance their counters in
//! lockstep and nonces never repeat.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::AEAD_NONCE_SIZE;

/// Counter limit before a session must be torn down and re-established.
const MAX_COUNTER: u64 = 1_000_000_000;

/// One direction of an established link's encryption state.
pub struct CipherState {
    cipher: XChaCha20Poly1305,
    salt: [u8; 16],
    counter: u64,
}

/// Both directions of an established link, as derived by the handshake.
pub struct SessionKeys {
    /// Cipher for frames this peer sends.
    pub tx: CipherState,
    /// Cipher for frames this peer receives.
    pub rx: CipherState,
}

impl CipherState {
    /// Create a cipher state from a derived key and nonce salt.
    #[must_use]
    pub fn new(key: &[u8; 32], salt: [u8; 16]) -> Self {
        let key = Zeroizing::new(*key);
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
            salt,
            counter: 0,
        }
    }

    /// Messages processed so far in this direction.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn next_nonce(&mut self) -> Result<XNonce, CryptoError> {
        if self.counter >= MAX_COUNTER {
            return Err(CryptoError::NonceOverflow);
        }
        let mut nonce = [0u8; AEAD_NONCE_SIZE];
        nonce[..16].copy_from_slice(&self.salt);
        nonce[16..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter += 1;
        Ok(XNonce::from(nonce))
    }

    /// Encrypt the next outbound message. Advances the counter.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)
    }

    /// Decrypt the next inbound message. Advances the counter only on
    /// success; a failed open leaves the state unusable by contract (the
    /// link must be closed).
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
