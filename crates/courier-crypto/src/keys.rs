//! X25519 identity keys (RFC 7748).
//!
//! A COURIER node is identified by its X25519 public key. Keypairs are
//! either generated fresh per process (ephemeral identity) or restored
//! from a caller-supplied 32-byte secret.

use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 secret key (32 bytes). Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct SecretKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes). Zeroized on drop.
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

/// An identity keypair.
#[derive(Clone)]
pub struct Keypair {
    public: PublicKey,
    secret: SecretKey,
}

impl SecretKey {
    /// Generate a new random secret key with RFC 7748 clamping.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this secret key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// Returns `None` if the peer's public key is a low-order point.
    #[must_use]
    pub fn exchange(&self, peer_public: &PublicKey) -> Option<SharedSecret> {
        let shared = self.0.diffie_hellman(&peer_public.0);

        // Check for low-order points
        if shared.as_bytes() == &[0u8; 32] {
            return None;
        }

        Some(SharedSecret(shared))
    }

    /// Export as bytes.
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw secret key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Hex-encode the full key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.as_bytes()[..8]))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// Feed this into a KDF before use as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = SecretKey::generate(rng);
        let public = secret.public_key();
        Self { public, secret }
    }

    /// Restore a keypair from a 32-byte secret.
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from_bytes(bytes);
        let public = secret.public_key();
        Self { public, secret }
    }

    /// The public half (the node's identity).
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The secret half.
    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair").field("public", &self.public).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_key_generation() {
        let keypair = Keypair::generate(&mut OsRng);
        assert_ne!(keypair.public_key().to_bytes(), [0u8; 32]);
    }

    #[test]
    fn test_key_exchange() {
        let alice = Keypair::generate(&mut OsRng);
        let bob = Keypair::generate(&mut OsRng);

        let alice_shared = alice.secret_key().exchange(bob.public_key()).unwrap();
        let bob_shared = bob.secret_key().exchange(alice.public_key()).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_reject_low_order_points() {
        let keypair = Keypair::generate(&mut OsRng);
        let zero_public = PublicKey::from_bytes([0u8; 32]);
        assert!(keypair.secret_key().exchange(&zero_public).is_none());
    }

    #[test]
    fn test_secret_roundtrip() {
        let original = Keypair::generate(&mut OsRng);
        let restored = Keypair::from_secret_bytes(original.secret_key().to_bytes());
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn test_hex_display() {
        let keypair = Keypair::generate(&mut OsRng);
        let hex = keypair.public_key().to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(
            PublicKey::from_bytes(keypair.public_key().to_bytes()).to_hex(),
            hex
        );
    }
}
