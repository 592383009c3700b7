//! Link handshake: mutual authentication and session key agreement.
//!
//! The pattern is a triple Diffie-Hellman over X25519, with the client's
//! static key sent in the first message (the client must already know the
//! server's static key to connect, so only the server is anonymous-proof):
//!
//! ```text
//! Client                                Server
//!   |                                     |
//!   |-- c_static_pub || c_eph_pub ------->|
//!   |                                     |
//!   |<------------------- s_eph_pub ------|
//!   |                                     |
//!   |<---------- AEAD(READY) -------------|
//!   |------------ AEAD(READY) ----------->|
//!   |                                     |
//!   |        [Link Established]           |
//! ```
//!
//! Both sides mix `DH(eph, eph)`, `DH(c_static, s_eph)` and
//! `DH(c_eph, s_static)` with the full public-key transcript through
//! `blake3::derive_key`. Only the holder of the server's static secret can
//! compute the third term, and only the holder of the client's static
//! secret can compute the second, so a successful `READY` exchange proves
//! both identities. Each direction gets an independent key and nonce salt.

use rand_core::OsRng;

use crate::aead::{CipherState, SessionKeys};
use crate::error::CryptoError;
use crate::keys::{Keypair, PublicKey, SecretKey, SharedSecret};
use crate::PUBLIC_KEY_SIZE;

/// Size of the client's opening handshake message.
pub const HELLO_SIZE: usize = 2 * PUBLIC_KEY_SIZE;

/// Size of the server's handshake response.
pub const RESPONSE_SIZE: usize = PUBLIC_KEY_SIZE;

/// Confirmation payload exchanged (encrypted) to complete the handshake.
pub const READY: &[u8] = b"COURIER/1 READY";

const KDF_C2S_KEY: &str = "COURIER v1 handshake c2s key";
const KDF_S2C_KEY: &str = "COURIER v1 handshake s2c key";
const KDF_C2S_SALT: &str = "COURIER v1 handshake c2s salt";
const KDF_S2C_SALT: &str = "COURIER v1 handshake s2c salt";

/// Client side of the link handshake.
pub struct ClientHandshake {
    local_static: Keypair,
    eph: SecretKey,
    eph_public: PublicKey,
    remote_static: PublicKey,
}

impl ClientHandshake {
    /// Start a handshake toward a server whose static key is known.
    #[must_use]
    pub fn new(local: &Keypair, remote_static: PublicKey) -> Self {
        let eph = SecretKey::generate(&mut OsRng);
        let eph_public = eph.public_key();
        Self {
            local_static: local.clone(),
            eph,
            eph_public,
            remote_static,
        }
    }

    /// The opening message: `c_static_pub || c_eph_pub`.
    #[must_use]
    pub fn hello(&self) -> [u8; HELLO_SIZE] {
        let mut msg = [0u8; HELLO_SIZE];
        msg[..PUBLIC_KEY_SIZE].copy_from_slice(self.local_static.public_key().as_bytes());
        msg[PUBLIC_KEY_SIZE..].copy_from_slice(self.eph_public.as_bytes());
        msg
    }

    /// Consume the server's response and derive the session keys.
    ///
    /// The returned keys are unconfirmed until the encrypted `READY`
    /// exchange succeeds.
    pub fn finish(self, response: &[u8]) -> Result<SessionKeys, CryptoError> {
        if response.len() != RESPONSE_SIZE {
            return Err(CryptoError::HandshakeTooShort {
                expected: RESPONSE_SIZE,
                actual: response.len(),
            });
        }
        let mut eph_bytes = [0u8; PUBLIC_KEY_SIZE];
        eph_bytes.copy_from_slice(response);
        let server_eph = PublicKey::from_bytes(eph_bytes);

        let dh_ee = self
            .eph
            .exchange(&server_eph)
            .ok_or(CryptoError::LowOrderPoint)?;
        let dh_es = self
            .local_static
            .secret_key()
            .exchange(&server_eph)
            .ok_or(CryptoError::LowOrderPoint)?;
        let dh_se = self
            .eph
            .exchange(&self.remote_static)
            .ok_or(CryptoError::LowOrderPoint)?;

        let transcript = transcript(
            self.local_static.public_key(),
            &self.eph_public,
            &self.remote_static,
            &server_eph,
        );
        Ok(derive_session(&dh_ee, &dh_es, &dh_se, &transcript, true))
    }
}

/// Server side of the link handshake.
pub struct ServerHandshake;

impl ServerHandshake {
    /// Process a client hello, producing the response message, the session
    /// keys, and the client's claimed static key.
    ///
    /// The client's identity is unverified until its encrypted `READY`
    /// arrives and opens correctly.
    pub fn respond(
        local: &Keypair,
        hello: &[u8],
    ) -> Result<([u8; RESPONSE_SIZE], SessionKeys, PublicKey), CryptoError> {
        if hello.len() != HELLO_SIZE {
            return Err(CryptoError::HandshakeTooShort {
                expected: HELLO_SIZE,
                actual: hello.len(),
            });
        }
        let mut static_bytes = [0u8; PUBLIC_KEY_SIZE];
        static_bytes.copy_from_slice(&hello[..PUBLIC_KEY_SIZE]);
        let client_static = PublicKey::from_bytes(static_bytes);
        let mut eph_bytes = [0u8; PUBLIC_KEY_SIZE];
        eph_bytes.copy_from_slice(&hello[PUBLIC_KEY_SIZE..]);
        let client_eph = PublicKey::from_bytes(eph_bytes);

        let eph = SecretKey::generate(&mut OsRng);
        let eph_public = eph.public_key();

        let dh_ee = eph.exchange(&client_eph).ok_or(CryptoError::LowOrderPoint)?;
        let dh_es = eph
            .exchange(&client_static)
            .ok_or(CryptoError::LowOrderPoint)?;
        let dh_se = local
            .secret_key()
            .exchange(&client_eph)
            .ok_or(CryptoError::LowOrderPoint)?;

        let transcript = transcript(&client_static, &client_eph, local.public_key(), &eph_public);
        let keys = derive_session(&dh_ee, &dh_es, &dh_se, &transcript, false);
        Ok((eph_public.to_bytes(), keys, client_static))
    }
}

fn transcript(
    c_static: &PublicKey,
    c_eph: &PublicKey,
    s_static: &PublicKey,
    s_eph: &PublicKey,
) -> [u8; 4 * PUBLIC_KEY_SIZE] {
    let mut out = [0u8; 4 * PUBLIC_KEY_SIZE];
    out[..32].copy_from_slice(c_static.as_bytes());
    out[32..64].copy_from_slice(c_eph.as_bytes());
    out[64..96].copy_from_slice(s_static.as_bytes());
    out[96..].copy_from_slice(s_eph.as_bytes());
    out
}

fn derive_session(
    dh_ee: &SharedSecret,
    dh_es: &SharedSecret,
    dh_se: &SharedSecret,
    transcript: &[u8],
    is_client: bool,
) -> SessionKeys {
    let mut ikm = Vec::with_capacity(3 * 32 + transcript.len());
    ikm.extend_from_slice(dh_ee.as_bytes());
    ikm.extend_from_slice(dh_es.as_bytes());
    ikm.extend_from_slice(dh_se.as_bytes());
    ikm.extend_from_slice(transcript);

    let c2s_key = blake3::derive_key(KDF_C2S_KEY, &ikm);
    let s2c_key = blake3::derive_key(KDF_S2C_KEY, &ikm);
    let mut c2s_salt = [0u8; 16];
    c2s_salt.copy_from_slice(&blake3::derive_key(KDF_C2S_SALT, &ikm)[..16]);
    let mut s2c_salt = [0u8; 16];
    s2c_salt.copy_from_slice(&blake3::derive_key(KDF_S2C_SALT, &ikm)[..16]);

    let c2s = CipherState::new(&c2s_key, c2s_salt);
    let s2c = CipherState::new(&s2c_key, s2c_salt);
    if is_client {
        SessionKeys { tx: c2s, rx: s2c }
    } else {
        SessionKeys { tx: s2c, rx: c2s }
    }
}
