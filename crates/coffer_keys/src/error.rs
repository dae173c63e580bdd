//! Error types for key operations.

use thiserror::Error;

/// Errors from key derivation and sealed-box operations.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The scrypt pass failed (parameters or output size).
    #[error("scrypt failed: {0}")]
    Scrypt(String),

    /// A sealed-box payload exceeds the 256 MiB sanity limit.
    #[error("payload too large for a sealed box")]
    PayloadTooLarge,

    /// A sealed box is shorter than its fixed overhead.
    #[error("sealed box is malformed")]
    MalformedBox,

    /// Sealed-box authentication failed: wrong key or tampered data.
    #[error("sealed box authentication failed")]
    AuthFailed,

    /// Base57 text held a foreign character or an out-of-range chunk.
    #[error("invalid Base57 key text")]
    InvalidBase57,

    /// The AEAD backend refused to operate.
    #[error("cipher failure")]
    Cipher,
}
