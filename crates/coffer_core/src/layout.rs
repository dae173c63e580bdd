//! On-disk record block layout.
//!
//! Every payload block starts with a 32-byte header:
//!
//! | Field | Offset | Meaning |
//! |---|---|---|
//! | `order` | 0..8 | Big-endian sequence number, 1-based; 0 never occurs in a valid block |
//! | `size` | 8..16 | Record byte count; `0` marks a terminator, `u64::MAX` a continuation |
//! | reserved | 16..32 | Zero |
//!
//! The remaining 4032 bytes carry record data (or, in a terminator, the
//! combined-hash snapshot in the first 64 bytes).

use coffer_storage::BLOCK_PAYLOAD;

/// Header bytes at the start of every payload block.
pub(crate) const HEADER_SIZE: usize = 32;

/// Record bytes carried per block.
pub(crate) const BLOCK_DATA: usize = BLOCK_PAYLOAD - HEADER_SIZE;

/// `size` marker for continuation blocks.
pub(crate) const CONTINUATION: u64 = u64::MAX;

/// Largest valid order. Orders live in `1..=MAX_ORDER`.
pub(crate) const MAX_ORDER: u64 = i64::MAX as u64;

/// Largest valid head `size`. Anything at or above this (other than the
/// continuation marker) is a malformed header.
pub(crate) const MAX_RECORD_SIZE: u64 = 1 << 31;

/// Sentinel block index meaning "no block".
pub(crate) const NO_BLOCK: u32 = u32::MAX;

/// Parsed block header.
pub(crate) struct BlockHead {
    pub order: u64,
    pub size: u64,
}

impl BlockHead {
    pub fn parse(block: &[u8; BLOCK_PAYLOAD]) -> Self {
        let mut order = [0u8; 8];
        let mut size = [0u8; 8];
        order.copy_from_slice(&block[0..8]);
        size.copy_from_slice(&block[8..16]);
        BlockHead {
            order: u64::from_be_bytes(order),
            size: u64::from_be_bytes(size),
        }
    }

    pub fn emit(&self, block: &mut [u8; BLOCK_PAYLOAD]) {
        block[0..8].copy_from_slice(&self.order.to_be_bytes());
        block[8..16].copy_from_slice(&self.size.to_be_bytes());
        block[16..HEADER_SIZE].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let mut block = [0xFFu8; BLOCK_PAYLOAD];
        BlockHead {
            order: 7,
            size: CONTINUATION,
        }
        .emit(&mut block);

        let head = BlockHead::parse(&block);
        assert_eq!(head.order, 7);
        assert_eq!(head.size, CONTINUATION);
        assert!(block[16..HEADER_SIZE].iter().all(|&b| b == 0));
        // Data area untouched.
        assert_eq!(block[HEADER_SIZE], 0xFF);
    }
}
