//! # Coffer Keys
//!
//! Password key derivation and asymmetric sealed boxes.
//!
//! [`MasterKey`] turns a password into a 128-byte secret with a memory-hard
//! scrypt pass and hands out labeled 64-byte subkeys through HMAC-SHA-512 —
//! one purpose string per subkey, so every consumer (container key, hash
//! salt, …) gets independent material from one password. It can also mint
//! random passphrases over curated dictionaries.
//!
//! [`PubKey`] is a 32-byte X25519 public key with anonymous sealed-box
//! encryption: an ephemeral key pair per message, the shared secret hashed
//! into an AES-256-GCM key, and the ephemeral public key authenticated as
//! AAD. Keys render as lowercase hex or as Base57 text.
//!
//! Passwords, secrets and intermediate key material are zeroized when
//! dropped or reset.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod master;
mod pubkey;

pub use error::KeyError;
pub use master::{Dictionary, MasterKey, DERIVED_KEY_SIZE, SECRET_SIZE};
pub use pubkey::{PubKey, BOX_OVERHEAD, PUBLIC_KEY_SIZE};
