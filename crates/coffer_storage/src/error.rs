//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while operating on the container file.
///
/// Per-block seal/open failures are deliberately *not* represented here:
/// block operations report plain `bool` success and the map layer above
/// folds failures into its error bitfield.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A size beyond the 1 PiB sanity limit was requested.
    #[error("requested size {requested} exceeds the container limit")]
    TooLarge {
        /// The rejected size in bytes.
        requested: u64,
    },
}
