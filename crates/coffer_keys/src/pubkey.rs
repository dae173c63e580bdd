//! X25519 public keys and anonymous sealed boxes.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use coffer_codec::{Persist, Reader, Writer};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::KeyError;

/// Size of an X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Fixed sealed-box overhead: the ephemeral public key plus the GCM tag.
pub const BOX_OVERHEAD: usize = PUBLIC_KEY_SIZE + 16;

/// Sanity limit on sealed-box payloads (256 MiB).
const MAX_BOX_PAYLOAD: usize = 0x1000_0000;

/// Base57 alphabet: digits, uppercase minus `B D I O`, lowercase minus `l`.
const BASE57: &[u8] = b"0123456789ACEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Characters per 8-byte chunk; 57^11 covers every 64-bit value.
const BASE57_CHUNK: usize = 11;

/// A 32-byte X25519 public key.
///
/// Supports anonymous sealed boxes: anyone holding the public key can
/// [`encrypt`](PubKey::encrypt); only the matching private key can
/// [`decrypt`](PubKey::decrypt). The sender's identity is not
/// authenticated — each box uses a one-shot ephemeral key pair.
///
/// Box layout: `ephemeral_pub(32) ‖ ciphertext ‖ tag(16)`. The symmetric
/// key is `SHA-512(X25519(ephemeral, recipient))[0..32]`, the GCM nonce is
/// twelve zero bytes (safe: the key never recurs), and the ephemeral
/// public key is bound as AAD.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PubKey {
    bytes: [u8; PUBLIC_KEY_SIZE],
}

impl PubKey {
    /// Wraps raw public-key bytes.
    pub fn new(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PubKey { bytes }
    }

    /// Computes the public key of `secret`.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let public = PublicKey::from(&StaticSecret::from(*secret));
        PubKey {
            bytes: public.to_bytes(),
        }
    }

    /// The raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.bytes
    }

    /// Lowercase hex rendering.
    pub fn hex(&self) -> String {
        const HEX: &[u8] = b"0123456789abcdef";
        let mut out = String::with_capacity(PUBLIC_KEY_SIZE * 2);
        for &byte in &self.bytes {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 15) as usize] as char);
        }
        out
    }

    /// Base57 rendering: each 8-byte big-endian chunk becomes 11 symbols.
    pub fn base57(&self) -> String {
        let mut out = vec![0u8; PUBLIC_KEY_SIZE / 8 * BASE57_CHUNK];
        for (chunk, text) in self.bytes.chunks_exact(8).zip(out.chunks_exact_mut(BASE57_CHUNK)) {
            let mut value = u64::from_be_bytes(chunk.try_into().expect("8-byte chunk"));
            for slot in text.iter_mut().rev() {
                *slot = BASE57[(value % 57) as usize];
                value /= 57;
            }
        }
        String::from_utf8(out).expect("alphabet is ASCII")
    }

    /// Parses a Base57 rendering.
    ///
    /// # Errors
    ///
    /// Returns an error on foreign characters, wrong length, or a chunk
    /// exceeding the 64-bit range.
    pub fn from_base57(text: &str) -> Result<Self, KeyError> {
        let raw = text.as_bytes();
        if raw.len() != PUBLIC_KEY_SIZE / 8 * BASE57_CHUNK {
            return Err(KeyError::InvalidBase57);
        }

        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        for (chunk, text) in bytes.chunks_exact_mut(8).zip(raw.chunks_exact(BASE57_CHUNK)) {
            let mut value: u64 = 0;
            for &symbol in text {
                let digit = BASE57
                    .iter()
                    .position(|&b| b == symbol)
                    .ok_or(KeyError::InvalidBase57)? as u64;
                value = value
                    .checked_mul(57)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or(KeyError::InvalidBase57)?;
            }
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        Ok(PubKey { bytes })
    }

    /// Shared-secret hash with a private key:
    /// `SHA-512(X25519(secret, self))`.
    pub fn shared_secret(&self, secret: &[u8; 32]) -> Zeroizing<[u8; 64]> {
        let shared = StaticSecret::from(*secret).diffie_hellman(&PublicKey::from(self.bytes));
        let digest = Sha512::digest(shared.as_bytes());
        let mut out = Zeroizing::new([0u8; 64]);
        out.copy_from_slice(&digest);
        out
    }

    /// Seals `plaintext` to this key. Output length is
    /// `plaintext.len() + BOX_OVERHEAD`.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload exceeds the sanity limit or the
    /// cipher backend fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
        if plaintext.len() > MAX_BOX_PAYLOAD {
            return Err(KeyError::PayloadTooLarge);
        }

        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(self.bytes));

        let mut digest = Zeroizing::new([0u8; 64]);
        digest.copy_from_slice(&Sha512::digest(shared.as_bytes()));
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest[..32]));

        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&[0u8; 12]),
                Payload {
                    msg: plaintext,
                    aad: ephemeral_pub.as_bytes(),
                },
            )
            .map_err(|_| KeyError::Cipher)?;

        let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + sealed.len());
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Opens a sealed box with the recipient's private key.
    ///
    /// # Errors
    ///
    /// Returns an error when the box is malformed, oversized, or fails
    /// authentication.
    pub fn decrypt(secret: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, KeyError> {
        if sealed.len() < BOX_OVERHEAD {
            return Err(KeyError::MalformedBox);
        }
        if sealed.len() - BOX_OVERHEAD > MAX_BOX_PAYLOAD {
            return Err(KeyError::PayloadTooLarge);
        }

        let mut ephemeral_pub = [0u8; PUBLIC_KEY_SIZE];
        ephemeral_pub.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);

        let digest = PubKey::new(ephemeral_pub).shared_secret(secret);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest[..32]));

        cipher
            .decrypt(
                Nonce::from_slice(&[0u8; 12]),
                Payload {
                    msg: &sealed[PUBLIC_KEY_SIZE..],
                    aad: &ephemeral_pub,
                },
            )
            .map_err(|_| KeyError::AuthFailed)
    }
}

impl std::fmt::Debug for PubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PubKey({})", self.hex())
    }
}

impl Persist for PubKey {
    fn save(&self, w: &mut Writer<'_>) {
        self.bytes.save(w);
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        self.bytes.load(r);
    }
}
