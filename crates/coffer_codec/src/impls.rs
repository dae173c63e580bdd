//! `Persist` implementations for the supported value kinds.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::tag::{
    BIT_FALSE, BIT_TRUE, NULL_VALUE, U32_SIZED, U32_VALUE, U64_SIZED, U64_VALUE, U8_SIZED,
    U8_VALUE,
};
use crate::{Persist, Reader, Writer};

/// Fixed-width scalars stored under a value tag (1, 4 and 8 byte types).
macro_rules! persist_value_scalar {
    ($($ty:ty => $tag:path, $len:expr;)*) => {$(
        impl Persist for $ty {
            fn save(&self, w: &mut Writer<'_>) {
                if *self == 0 {
                    w.put_tag(BIT_FALSE);
                } else {
                    w.put_tag($tag);
                    w.put(&self.to_be_bytes());
                }
            }

            fn load(&mut self, r: &mut Reader<'_>) {
                match r.peek() {
                    None => {}
                    Some(BIT_FALSE) => {
                        r.bump();
                        *self = 0;
                    }
                    Some($tag) => {
                        r.bump();
                        let mut bytes = [0u8; $len];
                        r.read_raw(&mut bytes);
                        *self = <$ty>::from_be_bytes(bytes);
                    }
                    Some(NULL_VALUE) => r.bump(),
                    Some(_) => r.drop_rest(),
                }
            }
        }
    )*};
}

persist_value_scalar! {
    u8 => U8_VALUE, 1;
    i8 => U8_VALUE, 1;
    u32 => U32_VALUE, 4;
    i32 => U32_VALUE, 4;
    u64 => U64_VALUE, 8;
    i64 => U64_VALUE, 8;
}

/// Scalars of other widths go out as fixed-size byte runs.
macro_rules! persist_sized_scalar {
    ($($ty:ty => $len:expr;)*) => {$(
        impl Persist for $ty {
            fn save(&self, w: &mut Writer<'_>) {
                if *self == 0 {
                    w.put_tag(BIT_FALSE);
                } else {
                    w.put_sized(&self.to_be_bytes());
                }
            }

            fn load(&mut self, r: &mut Reader<'_>) {
                match r.peek() {
                    None => {}
                    Some(BIT_FALSE) => {
                        r.bump();
                        *self = 0;
                    }
                    Some(t @ (U8_SIZED | U32_SIZED | U64_SIZED)) => {
                        r.bump();
                        let len = r.read_size(t);
                        if len == $len {
                            let mut bytes = [0u8; $len];
                            r.read_raw(&mut bytes);
                            *self = <$ty>::from_be_bytes(bytes);
                        } else {
                            // A run of the wrong width: step over it and
                            // give up on the rest of this document.
                            let _ = r.read_slice(len);
                            r.drop_rest();
                        }
                    }
                    Some(NULL_VALUE) => r.bump(),
                    Some(_) => r.drop_rest(),
                }
            }
        }
    )*};
}

persist_sized_scalar! {
    u16 => 2;
    i16 => 2;
    u128 => 16;
    i128 => 16;
}

/// Floats ride the 4/8-byte value tags as raw IEEE-754 bits. Only the
/// all-zero bit pattern collapses to the zero tag, so `-0.0` and NaN
/// payloads survive a round trip.
macro_rules! persist_float {
    ($($ty:ty => $bits:ty, $tag:path, $len:expr;)*) => {$(
        impl Persist for $ty {
            fn save(&self, w: &mut Writer<'_>) {
                if self.to_bits() == 0 {
                    w.put_tag(BIT_FALSE);
                } else {
                    w.put_tag($tag);
                    w.put(&self.to_bits().to_be_bytes());
                }
            }

            fn load(&mut self, r: &mut Reader<'_>) {
                match r.peek() {
                    None => {}
                    Some(BIT_FALSE) => {
                        r.bump();
                        *self = 0.0;
                    }
                    Some($tag) => {
                        r.bump();
                        let mut bytes = [0u8; $len];
                        r.read_raw(&mut bytes);
                        *self = <$ty>::from_bits(<$bits>::from_be_bytes(bytes));
                    }
                    Some(NULL_VALUE) => r.bump(),
                    Some(_) => r.drop_rest(),
                }
            }
        }
    )*};
}

persist_float! {
    f32 => u32, U32_VALUE, 4;
    f64 => u64, U64_VALUE, 8;
}

impl Persist for usize {
    fn save(&self, w: &mut Writer<'_>) {
        (*self as u64).save(w);
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        let mut wide = 0u64;
        wide.load(r);
        *self = wide as usize;
    }
}

impl Persist for bool {
    fn save(&self, w: &mut Writer<'_>) {
        w.put_tag(if *self { BIT_TRUE } else { BIT_FALSE });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        match r.peek() {
            None => {}
            Some(t @ (BIT_FALSE | BIT_TRUE)) => {
                r.bump();
                *self = t == BIT_TRUE;
            }
            Some(NULL_VALUE) => r.bump(),
            Some(_) => r.drop_rest(),
        }
    }
}

/// Byte-run load shared by `Vec<u8>` and `String`.
fn load_byte_run<'a>(r: &mut Reader<'a>) -> Option<&'a [u8]> {
    match r.peek() {
        None => None,
        Some(BIT_FALSE) => {
            r.bump();
            Some(&[])
        }
        Some(t @ (U8_SIZED | U32_SIZED | U64_SIZED)) => {
            r.bump();
            let len = r.read_size(t);
            Some(r.read_slice(len))
        }
        Some(NULL_VALUE) => {
            r.bump();
            None
        }
        Some(_) => {
            r.drop_rest();
            None
        }
    }
}

impl Persist for Vec<u8> {
    fn save(&self, w: &mut Writer<'_>) {
        w.put_sized(self);
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        if let Some(bytes) = load_byte_run(r) {
            self.clear();
            self.extend_from_slice(bytes);
        }
    }
}

impl Persist for String {
    fn save(&self, w: &mut Writer<'_>) {
        w.put_sized(self.as_bytes());
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        if let Some(bytes) = load_byte_run(r) {
            *self = String::from_utf8_lossy(bytes).into_owned();
        }
    }
}

/// Opaque fixed-width byte copies (keys, digests, identifiers).
impl<const N: usize> Persist for [u8; N]
where
    [u8; N]: Default,
{
    fn save(&self, w: &mut Writer<'_>) {
        if self.iter().all(|&b| b == 0) {
            w.put_tag(BIT_FALSE);
        } else {
            w.put_sized(self);
        }
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        match r.peek() {
            None => {}
            Some(BIT_FALSE) => {
                r.bump();
                *self = [0u8; N];
            }
            Some(t @ (U8_SIZED | U32_SIZED | U64_SIZED)) => {
                r.bump();
                let len = r.read_size(t);
                if len == N {
                    r.read_raw(self);
                } else {
                    let _ = r.read_slice(len);
                    r.drop_rest();
                }
            }
            Some(NULL_VALUE) => r.bump(),
            Some(_) => r.drop_rest(),
        }
    }
}

/// Ordered sequence of structured values. The element count is written as a
/// hint; reading appends until the document terminator, so a lying count
/// cannot over-allocate. The same wire shape serves multisets.
impl<T: Persist> Persist for VecDeque<T> {
    fn save(&self, w: &mut Writer<'_>) {
        if self.is_empty() {
            w.put_tag(BIT_FALSE);
            return;
        }
        w.doc(|w| {
            w.put_count(self.len());
            for item in self {
                w.field(item);
            }
        });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        r.container(
            self,
            VecDeque::clear,
            |r, arg| {
                let hint = r.read_count();
                arg.reserve(hint.min(r.remaining()));
                while r.more() {
                    let mut item = T::default();
                    item.load(r);
                    arg.push_back(item);
                }
            },
        );
    }
}

impl<K: Persist + Ord> Persist for BTreeSet<K> {
    fn save(&self, w: &mut Writer<'_>) {
        if self.is_empty() {
            w.put_tag(BIT_FALSE);
            return;
        }
        w.doc(|w| {
            w.put_count(self.len());
            for key in self {
                w.field(key);
            }
        });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        r.container(
            self,
            BTreeSet::clear,
            |r, arg| {
                let _hint = r.read_count();
                while r.more() {
                    let mut key = K::default();
                    key.load(r);
                    arg.insert(key);
                }
            },
        );
    }
}

impl<K: Persist + Eq + Hash> Persist for HashSet<K> {
    fn save(&self, w: &mut Writer<'_>) {
        if self.is_empty() {
            w.put_tag(BIT_FALSE);
            return;
        }
        w.doc(|w| {
            w.put_count(self.len());
            for key in self {
                w.field(key);
            }
        });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        r.container(
            self,
            HashSet::clear,
            |r, arg| {
                let hint = r.read_count();
                arg.reserve(hint.min(r.remaining()));
                while r.more() {
                    let mut key = K::default();
                    key.load(r);
                    arg.insert(key);
                }
            },
        );
    }
}

impl<K: Persist + Ord, V: Persist> Persist for BTreeMap<K, V> {
    fn save(&self, w: &mut Writer<'_>) {
        if self.is_empty() {
            w.put_tag(BIT_FALSE);
            return;
        }
        w.doc(|w| {
            w.put_count(self.len());
            for (key, value) in self {
                w.field(key);
                w.field(value);
            }
        });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        r.container(
            self,
            BTreeMap::clear,
            |r, arg| {
                let _hint = r.read_count();
                while r.more() {
                    let mut key = K::default();
                    key.load(r);
                    let mut value = V::default();
                    value.load(r);
                    arg.insert(key, value);
                }
            },
        );
    }
}

impl<K: Persist + Eq + Hash, V: Persist> Persist for HashMap<K, V> {
    fn save(&self, w: &mut Writer<'_>) {
        if self.is_empty() {
            w.put_tag(BIT_FALSE);
            return;
        }
        w.doc(|w| {
            w.put_count(self.len());
            for (key, value) in self {
                w.field(key);
                w.field(value);
            }
        });
    }

    fn load(&mut self, r: &mut Reader<'_>) {
        r.container(
            self,
            HashMap::clear,
            |r, arg| {
                let hint = r.read_count();
                arg.reserve(hint.min(r.remaining()));
                while r.more() {
                    let mut key = K::default();
                    key.load(r);
                    let mut value = V::default();
                    value.load(r);
                    arg.insert(key, value);
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_bytes, to_bytes};

    #[test]
    fn zero_scalars_collapse_to_one_byte() {
        assert_eq!(to_bytes(&0u8), vec![BIT_FALSE]);
        assert_eq!(to_bytes(&0u32), vec![BIT_FALSE]);
        assert_eq!(to_bytes(&0u64), vec![BIT_FALSE]);
        assert_eq!(to_bytes(&0.0f64), vec![BIT_FALSE]);
        assert_eq!(to_bytes(&Vec::<u8>::new()), vec![BIT_FALSE]);
        assert_eq!(to_bytes(&String::new()), vec![BIT_FALSE]);
    }

    #[test]
    fn scalar_wire_bytes() {
        assert_eq!(to_bytes(&0xABu8), vec![U8_VALUE, 0xAB]);
        assert_eq!(
            to_bytes(&0x0102_0304u32),
            vec![U32_VALUE, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(to_bytes(&true), vec![BIT_TRUE]);
        assert_eq!(to_bytes(&false), vec![BIT_FALSE]);
        // u16 travels as a two-byte run.
        assert_eq!(to_bytes(&0x1234u16), vec![U8_SIZED, 2, 0x12, 0x34]);
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(from_bytes::<u8>(&to_bytes(&0xFFu8)), 0xFF);
        assert_eq!(from_bytes::<i8>(&to_bytes(&-5i8)), -5);
        assert_eq!(from_bytes::<u16>(&to_bytes(&0xBEEFu16)), 0xBEEF);
        assert_eq!(from_bytes::<i32>(&to_bytes(&-123456i32)), -123456);
        assert_eq!(from_bytes::<u64>(&to_bytes(&u64::MAX)), u64::MAX);
        assert_eq!(from_bytes::<u128>(&to_bytes(&u128::MAX)), u128::MAX);
        assert_eq!(from_bytes::<f32>(&to_bytes(&1.5f32)), 1.5);
        assert_eq!(from_bytes::<f64>(&to_bytes(&-2.25f64)), -2.25);
        assert_eq!(from_bytes::<f64>(&to_bytes(&-0.0f64)).to_bits(), (-0.0f64).to_bits());
    }

    #[test]
    fn byte_runs() {
        let bytes = vec![1u8, 2, 3, 4];
        assert_eq!(from_bytes::<Vec<u8>>(&to_bytes(&bytes)), bytes);

        let text = "héllo".to_string();
        assert_eq!(from_bytes::<String>(&to_bytes(&text)), text);

        let key = [7u8; 32];
        assert_eq!(from_bytes::<[u8; 32]>(&to_bytes(&key)), key);
        assert_eq!(to_bytes(&[0u8; 32]), vec![BIT_FALSE]);
    }

    #[test]
    fn fixed_array_wrong_width_drops_document() {
        // Encode a 4-byte array, decode as an 8-byte one: the value stays
        // default and the cursor lands past the run.
        let bytes = to_bytes(&[1u8, 2, 3, 4]);
        let decoded: [u8; 8] = from_bytes(&bytes);
        assert_eq!(decoded, [0u8; 8]);
    }

    #[test]
    fn sequences_and_sets() {
        let mut deque = VecDeque::new();
        deque.push_back("a".to_string());
        deque.push_back(String::new());
        deque.push_back("c".to_string());
        assert_eq!(from_bytes::<VecDeque<String>>(&to_bytes(&deque)), deque);

        let set: BTreeSet<u32> = [3, 1, 2].into_iter().collect();
        assert_eq!(from_bytes::<BTreeSet<u32>>(&to_bytes(&set)), set);

        let hashed: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        assert_eq!(from_bytes::<HashSet<String>>(&to_bytes(&hashed)), hashed);

        assert_eq!(to_bytes(&VecDeque::<u64>::new()), vec![BIT_FALSE]);
    }

    #[test]
    fn maps() {
        let mut map = BTreeMap::new();
        map.insert("alpha".to_string(), 1u64);
        map.insert("beta".to_string(), 0u64);
        assert_eq!(from_bytes::<BTreeMap<String, u64>>(&to_bytes(&map)), map);

        let mut unordered = HashMap::new();
        unordered.insert(4u32, "four".to_string());
        unordered.insert(9u32, "nine".to_string());
        assert_eq!(
            from_bytes::<HashMap<u32, String>>(&to_bytes(&unordered)),
            unordered
        );
    }

    #[test]
    fn count_hint_is_advisory() {
        // A sequence document whose count hint (3) exceeds the elements
        // actually present: reading stops at the terminator.
        let bytes = vec![
            0x01, // document
            U8_VALUE, 3, // count hint
            U8_VALUE, 5, // one element
            0x00, // terminator
        ];
        let decoded: VecDeque<u8> = from_bytes(&bytes);
        assert_eq!(decoded, VecDeque::from([5u8]));
    }

    #[test]
    fn implausible_count_aborts_document() {
        // A count hint larger than the remaining input is treated as
        // corruption: the whole document is abandoned.
        let bytes = vec![0x01, U8_VALUE, 200, U8_VALUE, 5, 0x00];
        let decoded: VecDeque<u8> = from_bytes(&bytes);
        assert!(decoded.is_empty());
    }
}
