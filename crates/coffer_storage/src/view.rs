//! The encrypted block array.

use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use zeroize::Zeroize;

use crate::cipher::{BlockCipher, NONCE_SIZE, TAG_SIZE};
use crate::error::StorageResult;
use crate::file::{BlockFile, MAX_FILE_SIZE, RAW_BLOCK_SIZE};
use crate::key::StoreKey;

/// Plaintext payload carried by one sealed block.
pub const BLOCK_PAYLOAD: usize = RAW_BLOCK_SIZE - NONCE_SIZE - TAG_SIZE;

/// Largest gap a stream write may auto-extend across (1 GiB); a larger gap
/// means the offset is garbage.
const MAX_STREAM_EXTEND: u64 = 1024 * 1024 * 1024;

/// A random-access array of independently sealed payload blocks over one
/// container file.
///
/// Logical block `i` lives at physical offset `i * 4096`; its integrity is
/// bound to both `i` and the caller-supplied container id through the GCM
/// additional authenticated data, so relocating a sealed block within the
/// file (or grafting it into another container) fails verification.
///
/// Per-block operations report `bool`: the caller treats a failed read's
/// output as uninitialized, and failure detail does not cross this
/// boundary. The view is not internally synchronized.
pub struct View {
    file: BlockFile,
    cipher: BlockCipher,
    count: u64,
    scratch: Box<[u8; BLOCK_PAYLOAD]>,
}

impl View {
    /// Opens or creates the container at `path`, keyed with `key`.
    ///
    /// Trailing bytes beyond the last whole physical block are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or sized.
    pub fn open(path: &Path, key: &StoreKey) -> StorageResult<Self> {
        let file = BlockFile::open(path)?;
        let count = file.len()? / RAW_BLOCK_SIZE as u64;
        tracing::debug!(count, path = %path.display(), "container opened");

        Ok(Self {
            file,
            cipher: BlockCipher::new(key),
            count,
            scratch: Box::new([0u8; BLOCK_PAYLOAD]),
        })
    }

    /// Number of payload blocks.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Effective storage size: payload bytes across all blocks.
    pub fn size(&self) -> u64 {
        self.count * BLOCK_PAYLOAD as u64
    }

    /// Reads and verifies block `index` into `out`.
    ///
    /// Returns `false` if the index is out of range, the physical read
    /// fails, or authentication fails; `out` must then be treated as
    /// uninitialized.
    pub fn read_block(&mut self, index: u64, out: &mut [u8; BLOCK_PAYLOAD], ident: u64) -> bool {
        read_sealed(&mut self.file, &self.cipher, self.count, index, ident, out)
    }

    /// Seals `data` with a fresh random nonce and writes it as block
    /// `index`. Writing at `index == count()` appends a new block.
    pub fn write_block(&mut self, index: u64, data: &[u8; BLOCK_PAYLOAD], ident: u64) -> bool {
        write_sealed(
            &mut self.file,
            &self.cipher,
            &mut self.count,
            index,
            ident,
            data,
        )
    }

    /// Resizes the container to hold `new_size` payload bytes, rounded up
    /// to a whole block. Shrinking truncates the file; growing writes
    /// freshly sealed all-zero blocks so the new region still looks
    /// random. Returns the resulting payload size.
    pub fn trunc(&mut self, new_size: u64) -> u64 {
        let old_raw = self.count * RAW_BLOCK_SIZE as u64;
        let new_raw = raw_size(new_size);

        if old_raw == new_raw || new_size > MAX_FILE_SIZE {
            return self.size();
        }

        if new_raw < old_raw {
            if self.file.truncate(new_raw).is_err() {
                return self.size();
            }
            self.count = new_raw / RAW_BLOCK_SIZE as u64;
        } else {
            let zeros = [0u8; BLOCK_PAYLOAD];
            for index in old_raw / RAW_BLOCK_SIZE as u64..new_raw / RAW_BLOCK_SIZE as u64 {
                if !self.write_block(index, &zeros, 0) {
                    return index * BLOCK_PAYLOAD as u64;
                }
            }
        }

        self.size()
    }

    /// Streams `out.len()` payload bytes starting at payload offset
    /// `offset`, crossing block boundaries as needed. Returns the number
    /// of bytes read; a short count means a block failed.
    pub fn read(&mut self, mut offset: u64, out: &mut [u8]) -> usize {
        let Self {
            file,
            cipher,
            count,
            scratch,
        } = self;

        let mut result = 0;
        while result < out.len() {
            let within = (offset % BLOCK_PAYLOAD as u64) as usize;
            let step = (out.len() - result).min(BLOCK_PAYLOAD - within);

            if !read_sealed(
                file,
                cipher,
                *count,
                offset / BLOCK_PAYLOAD as u64,
                0,
                scratch,
            ) {
                break;
            }
            out[result..result + step].copy_from_slice(&scratch[within..within + step]);

            offset += step as u64;
            result += step;
        }

        scratch.zeroize();
        result
    }

    /// Streams `data` to payload offset `offset`, extending the container
    /// as needed (bounded at 1 GiB of auto-extension) and read-modify-
    /// writing partial blocks through an internal scratch buffer. Returns
    /// the number of bytes written.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        let mut payload_len = self.size();
        let aligned = offset - offset % BLOCK_PAYLOAD as u64;

        if payload_len < aligned {
            if aligned - payload_len > MAX_STREAM_EXTEND {
                return 0;
            }
            // Seal the gap between the old end and the write start.
            if self.trunc(aligned) != aligned {
                return 0;
            }
            payload_len = aligned;
        }

        let Self {
            file,
            cipher,
            count,
            scratch,
        } = self;

        let mut result = 0;
        let mut offset = offset;
        while result < data.len() {
            let within = (offset % BLOCK_PAYLOAD as u64) as usize;
            let step = (data.len() - result).min(BLOCK_PAYLOAD - within);
            let index = offset / BLOCK_PAYLOAD as u64;

            if step < BLOCK_PAYLOAD {
                if offset >= payload_len {
                    // Fresh block past the old end.
                    scratch.fill(0);
                } else if !read_sealed(file, cipher, *count, index, 0, scratch) {
                    break;
                }
                scratch[within..within + step].copy_from_slice(&data[result..result + step]);
            } else {
                scratch.copy_from_slice(&data[result..result + step]);
            }

            if !write_sealed(file, cipher, count, index, 0, scratch) {
                break;
            }

            offset += step as u64;
            result += step;
        }

        scratch.zeroize();
        result
    }

    /// Best-effort preallocation for `future_size` payload bytes without
    /// changing the block count.
    pub fn alloc(&mut self, future_size: u64) -> bool {
        let old_raw = self.count * RAW_BLOCK_SIZE as u64;
        let new_raw = raw_size(future_size);

        if old_raw >= new_raw {
            return true;
        }
        self.file.allocate(new_raw).is_ok()
    }

    /// Pushes everything written so far to durable storage.
    pub fn flush(&mut self) -> bool {
        self.file.sync().is_ok()
    }

    /// Marks the container file for removal on close.
    pub fn set_delete(&mut self) -> bool {
        self.file.set_delete()
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.scratch.zeroize();

        if self.count > 0 {
            // Trim allocation slack and any trailing partial block.
            let _ = self.file.truncate(self.count * RAW_BLOCK_SIZE as u64);
        } else if !self.file.set_delete() {
            let _ = self.file.truncate(0);
        }
    }
}

/// Physical size needed to hold `payload` bytes.
fn raw_size(payload: u64) -> u64 {
    let blocks = payload / BLOCK_PAYLOAD as u64
        + if payload % BLOCK_PAYLOAD as u64 != 0 {
            1
        } else {
            0
        };
    blocks * RAW_BLOCK_SIZE as u64
}

/// Big-endian AAD binding a block to its container and position.
fn block_aad(ident: u64, index: u64) -> [u8; 16] {
    let mut aad = [0u8; 16];
    aad[..8].copy_from_slice(&ident.to_be_bytes());
    aad[8..].copy_from_slice(&index.to_be_bytes());
    aad
}

fn read_sealed(
    file: &mut BlockFile,
    cipher: &BlockCipher,
    count: u64,
    index: u64,
    ident: u64,
    out: &mut [u8; BLOCK_PAYLOAD],
) -> bool {
    if index >= count {
        return false;
    }

    let mut raw = [0u8; RAW_BLOCK_SIZE];
    if file.read_block(index, &mut raw).is_err() {
        return false;
    }

    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&raw[..NONCE_SIZE]);

    match cipher.open(&nonce, &block_aad(ident, index), &raw[NONCE_SIZE..]) {
        Some(plain) => {
            out.copy_from_slice(&plain);
            true
        }
        None => false,
    }
}

fn write_sealed(
    file: &mut BlockFile,
    cipher: &BlockCipher,
    count: &mut u64,
    index: u64,
    ident: u64,
    data: &[u8; BLOCK_PAYLOAD],
) -> bool {
    if index > *count {
        return false;
    }

    let mut nonce = [0u8; NONCE_SIZE];
    if OsRng.try_fill_bytes(&mut nonce).is_err() {
        return false;
    }

    let sealed = match cipher.seal(&nonce, &block_aad(ident, index), data) {
        Some(sealed) => sealed,
        None => return false,
    };

    let mut raw = [0u8; RAW_BLOCK_SIZE];
    raw[..NONCE_SIZE].copy_from_slice(&nonce);
    raw[NONCE_SIZE..].copy_from_slice(&sealed);

    if file.write_block(index, &raw).is_err() {
        return false;
    }

    if index == *count {
        *count = index + 1;
    }
    true
}
