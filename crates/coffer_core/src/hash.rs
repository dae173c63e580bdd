//! Salt-keyed XOR set hash.

use hmac::{Hmac, Mac};
use sha2::Sha512;

/// Size of the accumulated hash in bytes.
pub const COMBINED_HASH_SIZE: usize = 64;

/// An order-independent set hash: HMAC-SHA-512 of each element, XOR-ed
/// into a 64-byte accumulator.
///
/// XOR is commutative and self-inverse, so combining the same element twice
/// cancels it — inserting and deleting elements are the same operation.
/// Two accumulators over the same salt are equal exactly when they hold the
/// same element multiset (up to cancellation). The salt keys the HMAC, so
/// the hash proves set equality only to holders of the salt; it is not a
/// commitment to element *contents* beyond the hashed tuples.
pub struct CombinedHash {
    mac: Hmac<Sha512>,
    acc: [u8; COMBINED_HASH_SIZE],
}

impl CombinedHash {
    /// Creates an empty accumulator keyed with `salt`.
    pub fn new(salt: &[u8]) -> Self {
        let mac = Hmac::<Sha512>::new_from_slice(salt).expect("HMAC accepts any salt length");
        CombinedHash {
            mac,
            acc: [0u8; COMBINED_HASH_SIZE],
        }
    }

    /// XORs `HMAC(salt, data)` into the accumulator. Combining the same
    /// data again removes it.
    pub fn combine(&mut self, data: &[u8]) {
        let mut mac = self.mac.clone();
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        for (acc, byte) in self.acc.iter_mut().zip(digest) {
            *acc ^= byte;
        }
    }

    /// Compares the accumulator against a stored snapshot.
    pub fn check(&self, other: &[u8; COMBINED_HASH_SIZE]) -> bool {
        self.acc == *other
    }

    /// Returns the accumulator value.
    pub fn dump(&self) -> [u8; COMBINED_HASH_SIZE] {
        self.acc
    }

    /// Resets the accumulator to the empty-set value (all zeros).
    pub fn clear(&mut self) {
        self.acc = [0u8; COMBINED_HASH_SIZE];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_accumulator_is_zero() {
        let hash = CombinedHash::new(b"salt");
        assert!(hash.check(&[0u8; COMBINED_HASH_SIZE]));
    }

    #[test]
    fn combine_twice_cancels() {
        let mut hash = CombinedHash::new(b"salt");
        hash.combine(b"element");
        assert!(!hash.check(&[0u8; COMBINED_HASH_SIZE]));

        hash.combine(b"element");
        assert!(hash.check(&[0u8; COMBINED_HASH_SIZE]));
    }

    #[test]
    fn order_independent() {
        let mut a = CombinedHash::new(b"salt");
        a.combine(b"one");
        a.combine(b"two");
        a.combine(b"three");

        let mut b = CombinedHash::new(b"salt");
        b.combine(b"three");
        b.combine(b"one");
        b.combine(b"two");

        assert!(a.check(&b.dump()));
    }

    #[test]
    fn salt_keys_the_hash() {
        let mut a = CombinedHash::new(b"salt-a");
        a.combine(b"element");
        let mut b = CombinedHash::new(b"salt-b");
        b.combine(b"element");
        assert!(!a.check(&b.dump()));
    }
}
