//! # Coffer Storage
//!
//! Encrypted single-file block store.
//!
//! A [`View`] presents a file as an array of fixed-size payload blocks, each
//! sealed independently with AES-256-GCM. The sealed layout per 4096-byte
//! physical block is:
//!
//! ```text
//! [nonce (16 bytes)][ciphertext (4064 bytes)][auth tag (16 bytes)]
//! ```
//!
//! The GCM additional authenticated data is never stored: it is the
//! big-endian pair `(container id, block index)`, so a sealed block only
//! verifies at the position it was written to and inside the container it
//! was written for. Nonces are drawn fresh from the OS CSPRNG on every
//! write, which makes a correctly keyed container indistinguishable from
//! random data.
//!
//! The layers below the view are [`BlockFile`] (raw physical block I/O over
//! one host file) and [`BlockCipher`] (the 16-byte-nonce AES-256-GCM
//! instantiation). Neither the view nor the file is internally
//! synchronized; the map layer above owns the single guard.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cipher;
mod error;
mod file;
mod key;
mod view;

pub use cipher::{BlockCipher, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use file::{find_all, BlockFile, RAW_BLOCK_SIZE};
pub use key::{StoreKey, KEY_SIZE};
pub use view::{View, BLOCK_PAYLOAD};
