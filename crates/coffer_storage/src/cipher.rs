//! Authenticated block cipher: AES-256-GCM with a 16-byte nonce.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, KeyInit, Nonce};

use crate::key::StoreKey;

/// Nonce length in bytes. The container format fixes 16 bytes rather than
/// GCM's conventional 12, so the cipher is instantiated with an explicit
/// nonce width.
pub const NONCE_SIZE: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A keyed AES-256-GCM context serving both directions.
///
/// The key lives only inside the cipher schedule; it is supplied at
/// construction and never persisted by this layer.
pub struct BlockCipher {
    cipher: Aes256Gcm16,
}

impl BlockCipher {
    /// Builds a cipher context from a 256-bit key.
    pub fn new(key: &StoreKey) -> Self {
        let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Seals `plaintext` under `nonce` and `aad`, returning
    /// `ciphertext ‖ tag`. Fails only if the AEAD backend does.
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], aad: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
        self.cipher
            .encrypt(
                Nonce::<U16>::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .ok()
    }

    /// Opens `ciphertext ‖ tag`, verifying the tag against `nonce` and
    /// `aad`. Returns `None` on any verification failure.
    pub fn open(&self, nonce: &[u8; NONCE_SIZE], aad: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::<U16>::from_slice(nonce), Payload { msg: sealed, aad })
            .ok()
    }
}
