//! # Coffer Core
//!
//! Log-structured keyed map over the encrypted block store.
//!
//! A [`Store`] keeps one record per key, each record occupying a run of
//! payload blocks in a [`coffer_storage::View`]. Updates are copy-on-write:
//! a changed record is written to freshly allocated blocks, and a *commit*
//! seals the generation by writing a terminator block that carries a keyed
//! XOR-hash of the live record set, followed by a durable flush. Crash
//! recovery scans every block and converges in up to three passes —
//! optimistic, rollback to the last committed generation, and best-effort
//! salvage.
//!
//! Failures during normal operation never abort the store; they accumulate
//! in an observable error bitfield (see [`error_bits`]).
//!
//! ```no_run
//! use coffer_core::Store;
//! use coffer_storage::{StoreKey, View};
//! use std::path::Path;
//!
//! let view = View::open(Path::new("ledger.db"), &StoreKey::new([0u8; 32]))?;
//! let store: Store<String, u64> = Store::new(b"ledger-salt");
//! store.init(view);
//!
//! store.commit(|w| {
//!     w.add("alpha".to_string(), 1);
//!     w.add("beta".to_string(), 2);
//! });
//!
//! let beta = store.read(|r| r.get(&"beta".to_string()).copied());
//! assert_eq!(beta, Some(2));
//! # Ok::<(), coffer_storage::StorageError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod freespace;
mod hash;
mod layout;
mod store;

pub use hash::{CombinedHash, COMBINED_HASH_SIZE};
pub use store::{Reader, Store, Writer};

/// Bits of the store's accumulated error word.
///
/// Errors do not stop the store; they are observable through
/// [`Store::error_bits`] and cleared only by reopening a healthy container.
pub mod error_bits {
    /// A block failed to decrypt or verify.
    pub const DECRYPT_FAILED: u32 = 1;
    /// A block carried an out-of-range order or size.
    pub const BAD_HEADER: u32 = 2;
    /// A block from an uncommitted generation was discarded.
    pub const ORDER_AHEAD: u32 = 4;
    /// A record run broke off mid-way.
    pub const TRUNCATED_RUN: u32 = 8;
    /// A record run needed more blocks than the file holds.
    pub const RUN_SIZE_MISMATCH: u32 = 16;
    /// Recovery fell through to the salvage pass; contents are best-effort.
    pub const SALVAGED: u32 = 32;
    /// A record write failed and was rolled back.
    pub const WRITE_FAILED: u32 = 64;
    /// A terminator write failed; the commit did not happen.
    pub const TERMINATOR_WRITE_FAILED: u32 = 128;
}
