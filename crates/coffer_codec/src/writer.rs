//! Encoding context, shared by the probing and filling passes.

use crate::tag::{self, BIT_FALSE, DOCUMENT, NULL_VALUE, TERMINATOR};
use crate::Persist;

/// Encoding context.
///
/// A writer either *probes* (counts output bytes without a buffer) or
/// *fills* a preallocated buffer; every `save` implementation runs the same
/// code in both modes. [`crate::encode_with`] drives the two passes.
pub struct Writer<'a> {
    out: Option<&'a mut [u8]>,
    pos: usize,
}

impl<'a> Writer<'a> {
    /// Creates a probing writer that only accumulates a size.
    pub fn probe() -> Writer<'static> {
        Writer { out: None, pos: 0 }
    }

    /// Creates a filling writer over a buffer sized by a prior probe pass.
    pub fn fill(buf: &'a mut [u8]) -> Writer<'a> {
        Writer {
            out: Some(buf),
            pos: 0,
        }
    }

    /// Bytes written (or, in probe mode, counted) so far.
    pub fn size(&self) -> usize {
        self.pos
    }

    /// Writes one value.
    pub fn field<T: Persist>(&mut self, value: &T) {
        value.save(self);
    }

    /// Writes a null placeholder, keeping the slot of a deleted field.
    pub fn null(&mut self) {
        self.put_tag(NULL_VALUE);
    }

    /// Writes a metadata text run. Readers that know the text skip it;
    /// readers that do not will drop the remainder of the document, so
    /// metadata renames are format breaks.
    ///
    /// Every byte must be above `0x1F`, which plain ASCII text satisfies.
    pub fn name(&mut self, text: &str) {
        debug_assert!(
            text.bytes().all(|b| b > NULL_VALUE),
            "metadata text must not contain control bytes"
        );
        self.put(text.as_bytes());
    }

    /// Writes a document scope: begin tag, the fields emitted by `f`, end
    /// tag.
    pub fn doc(&mut self, f: impl FnOnce(&mut Self)) {
        self.put_tag(DOCUMENT);
        f(self);
        self.put_tag(TERMINATOR);
    }

    pub(crate) fn put(&mut self, bytes: &[u8]) {
        if let Some(out) = self.out.as_deref_mut() {
            out[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        }
        self.pos += bytes.len();
    }

    pub(crate) fn put_tag(&mut self, tag: u8) {
        self.put(&[tag]);
    }

    /// Raw size scalar in its narrowest width; the preceding tag already
    /// told the reader which width to expect.
    pub(crate) fn put_size(&mut self, size: usize) {
        if size < 256 {
            self.put(&[size as u8]);
        } else if size <= u32::MAX as usize {
            self.put(&(size as u32).to_be_bytes());
        } else {
            self.put(&(size as u64).to_be_bytes());
        }
    }

    /// Sized byte run, with the empty run collapsed to the zero tag.
    pub(crate) fn put_sized(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            self.put_tag(BIT_FALSE);
            return;
        }
        self.put_tag(tag::sized_tag(bytes.len()));
        self.put_size(bytes.len());
        self.put(bytes);
    }

    /// Container element count, width chosen by magnitude, zero collapsed.
    pub(crate) fn put_count(&mut self, count: usize) {
        if count == 0 {
            self.put_tag(BIT_FALSE);
            return;
        }
        self.put_tag(tag::value_tag(count));
        self.put_size(count);
    }
}
