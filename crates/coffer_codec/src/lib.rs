//! # Coffer Codec
//!
//! Compact, self-describing value encoding for Coffer records.
//!
//! Every encoded item starts with a one-byte tag that tells a reader how to
//! consume it, so documents written by newer code remain readable by older
//! code and vice versa:
//!
//! - Missing trailing fields decode to their defaults.
//! - Unrecognized or malformed items cause the rest of the *current*
//!   document to be skipped; the enclosing document resumes afterwards.
//! - A deleted field keeps its slot as a [`null`](Writer::null) placeholder
//!   so the ordinal positions of later fields stay stable.
//!
//! ## Wire format
//!
//! | Tag | Meaning |
//! |---|---|
//! | `0x00` | End of the current document |
//! | `0x01` | Begin document (ends at the matching `0x00`) |
//! | `0x02` | `false`, a zero scalar, or an empty container |
//! | `0x03` | `true` |
//! | `0x04` | u8 value |
//! | `0x05` | byte run with u8 size |
//! | `0x06` | u32 value (also f32) |
//! | `0x07` | byte run with u32 size |
//! | `0x08` | u64 value (also f64) |
//! | `0x09` | byte run with u64 size |
//! | `0x0A`–`0x1E` | Reserved: reading aborts |
//! | `0x1F` | Null placeholder |
//! | `0x20`–`0xFF` | Metadata text, running until the next byte `<= 0x1F` |
//!
//! All multi-byte integers are big-endian.
//!
//! ## Modes
//!
//! Encoding runs twice through the same code path: a probing pass that only
//! counts bytes, then a writing pass into a buffer preallocated to exactly
//! that size. Decoding never fails: malformed input degrades to default
//! values, which is why this crate exports no error type.
//!
//! ## Usage
//!
//! ```
//! use coffer_codec::{from_bytes, to_bytes, Persist, Reader, Writer};
//!
//! #[derive(Default, PartialEq, Debug)]
//! struct Account {
//!     name: String,
//!     balance: u64,
//! }
//!
//! impl Persist for Account {
//!     fn save(&self, w: &mut Writer<'_>) {
//!         w.doc(|w| {
//!             w.field(&self.name);
//!             w.field(&self.balance);
//!         });
//!     }
//!
//!     fn load(&mut self, r: &mut Reader<'_>) {
//!         r.doc(|r| {
//!             r.field(&mut self.name);
//!             r.field(&mut self.balance);
//!         });
//!     }
//! }
//!
//! let account = Account { name: "alice".into(), balance: 7 };
//! let bytes = to_bytes(&account);
//! assert_eq!(from_bytes::<Account>(&bytes), account);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bitset;
mod impls;
mod reader;
mod tag;
mod writer;

pub use bitset::BitSet;
pub use reader::Reader;
pub use writer::Writer;

/// A value that can be stored in and loaded from the Coffer wire format.
///
/// `load` mutates an existing value that starts out as `Default::default()`;
/// fields absent from the input are simply left untouched. Implementations
/// for structured records should wrap their fields in a single
/// [`Writer::doc`] / [`Reader::doc`] scope and keep the field order stable
/// across versions.
pub trait Persist: Default {
    /// Writes this value through `w` (probing or filling, transparently).
    fn save(&self, w: &mut Writer<'_>);

    /// Reads this value from `r`, leaving it at its default when the input
    /// holds nothing usable.
    fn load(&mut self, r: &mut Reader<'_>);
}

/// Runs `f` in probe mode to learn the output size, then again in fill mode
/// over a buffer of exactly that size, and returns the buffer.
pub fn encode_with(f: impl Fn(&mut Writer<'_>)) -> Vec<u8> {
    let mut probe = Writer::probe();
    f(&mut probe);
    let size = probe.size();

    let mut buf = vec![0u8; size];
    if size > 0 {
        let mut w = Writer::fill(&mut buf);
        f(&mut w);
        debug_assert_eq!(w.size(), size);
    }
    buf
}

/// Computes the encoded size of whatever `f` writes, without writing it.
pub fn probe_with(f: impl FnOnce(&mut Writer<'_>)) -> usize {
    let mut probe = Writer::probe();
    f(&mut probe);
    probe.size()
}

/// Encodes a single value.
pub fn to_bytes<T: Persist>(value: &T) -> Vec<u8> {
    encode_with(|w| value.save(w))
}

/// Decodes a single value, defaulting whatever the input does not provide.
pub fn from_bytes<T: Persist>(data: &[u8]) -> T {
    let mut reader = Reader::new(data);
    let mut value = T::default();
    value.load(&mut reader);
    value
}
