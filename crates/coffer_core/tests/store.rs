//! End-to-end store scenarios: commit, reopen, crash, corruption.

use coffer_core::{error_bits, Store};
use coffer_storage::{StoreKey, View, BLOCK_PAYLOAD, RAW_BLOCK_SIZE};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::path::Path;

const SALT: &[u8] = b"store-test-salt";

fn key() -> StoreKey {
    StoreKey::new([0x5Au8; 32])
}

fn open_store<V: coffer_codec::Persist>(path: &Path) -> Store<String, V> {
    let view = View::open(path, &key()).unwrap();
    let store = Store::new(SALT);
    store.init(view);
    store
}

#[test]
fn insert_commit_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s3.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.commit(|w| {
            w.add("alpha".to_string(), 1);
            w.add("beta".to_string(), 2);
        });
        assert_eq!(store.error_bits(), 0);
    }

    let store: Store<String, u64> = open_store(&path);
    assert_eq!(store.error_bits(), 0);
    store.read(|r| {
        assert_eq!(r.len(), 2);
        assert_eq!(r.get(&"alpha".to_string()), Some(&1));
        assert_eq!(r.get(&"beta".to_string()), Some(&2));
    });
}

#[test]
fn uncommitted_write_rolls_back_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s4.db");

    let store: Store<String, u64> = open_store(&path);
    store.commit(|w| {
        w.add("x".to_string(), 1);
    });

    // Update without a commit, then "crash": the destructor (which would
    // run the final commit) never executes.
    store.write(|w| {
        if let Some(v) = w.get_mut(&"x".to_string()) {
            *v = 2;
        }
    });
    std::mem::forget(store);

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| {
        assert_eq!(r.get(&"x".to_string()), Some(&1));
    });
    assert_eq!(store.error_bits() & error_bits::SALVAGED, 0);
}

#[test]
fn crash_before_first_data_commit_yields_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s4b.db");

    let store: Store<String, u64> = open_store(&path);
    store.write(|w| {
        w.add("ghost".to_string(), 9);
    });
    std::mem::forget(store);

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| assert!(r.is_empty()));
    assert_eq!(store.error_bits() & error_bits::SALVAGED, 0);
}

#[test]
fn shrinking_a_record_frees_and_reuses_its_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s5.db");

    let store: Store<String, Vec<u8>> = open_store(&path);

    // Three-block record.
    store.commit(|w| {
        w.add("big".to_string(), vec![0xAB; 10_000]);
    });
    let tall = store.block_count();

    // Overwrite with a single-block record; the commit must return the old
    // three blocks to the free-space index.
    store.commit(|w| {
        if let Some(v) = w.get_mut(&"big".to_string()) {
            *v = vec![0xCD; 16];
        }
    });
    let freed = store.free_intervals();
    assert!(
        freed
            .iter()
            .any(|&(start, len)| start <= 1 && (start as u64 + len as u64) >= 4),
        "old run not in free space: {freed:?}"
    );

    // A new three-block record fits into the hole (best-fit), so the
    // container does not grow by another three blocks.
    let before = store.block_count();
    store.commit(|w| {
        w.add("big2".to_string(), vec![0xEF; 10_000]);
    });
    assert_eq!(store.block_count(), before);
    assert!(store.block_count() <= tall + 1);

    drop(store);
    let store: Store<String, Vec<u8>> = open_store(&path);
    assert_eq!(store.error_bits(), 0);
    store.read(|r| {
        assert_eq!(r.get(&"big".to_string()), Some(&vec![0xCD; 16]));
        assert_eq!(r.get(&"big2".to_string()), Some(&vec![0xEF; 10_000]));
    });
}

#[test]
fn combined_hash_matches_raw_terminator() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s6.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.commit(|w| {
            w.add("alpha".to_string(), 1);
            w.add("beta".to_string(), 2);
        });
    }

    // Walk the raw container: collect every record head and the newest
    // terminator, then recompute the XOR of HMAC(salt, order ‖ block).
    let mut view = View::open(&path, &key()).unwrap();
    let mut acc = [0u8; 64];
    let mut best_term: Option<(u64, [u8; 64])> = None;

    let mut block = [0u8; BLOCK_PAYLOAD];
    for i in 0..view.count() {
        assert!(view.read_block(i, &mut block, 0));
        let order = u64::from_be_bytes(block[0..8].try_into().unwrap());
        let size = u64::from_be_bytes(block[8..16].try_into().unwrap());

        if size == 0 {
            if best_term.map_or(true, |(o, _)| o < order) {
                let mut snapshot = [0u8; 64];
                snapshot.copy_from_slice(&block[32..96]);
                best_term = Some((order, snapshot));
            }
        } else if size != u64::MAX {
            let mut tuple = [0u8; 16];
            tuple[..8].copy_from_slice(&order.to_be_bytes());
            tuple[8..].copy_from_slice(&i.to_be_bytes());

            let mut mac = Hmac::<Sha512>::new_from_slice(SALT).unwrap();
            mac.update(&tuple);
            for (a, b) in acc.iter_mut().zip(mac.finalize().into_bytes()) {
                *a ^= b;
            }
        }
    }

    let (_, snapshot) = best_term.expect("no terminator found");
    assert_eq!(acc, snapshot);
}

#[test]
fn corrupting_a_dead_block_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt-dead.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.commit(|w| {
            w.add("k".to_string(), 7);
        });
    }

    // Block 0 is the initial empty terminator, superseded by the first
    // data commit. Corrupting it must not affect the live state.
    flip_byte(&path, 0);

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| assert_eq!(r.get(&"k".to_string()), Some(&7)));
    assert_ne!(store.error_bits() & error_bits::DECRYPT_FAILED, 0);
    assert_eq!(store.error_bits() & error_bits::SALVAGED, 0);
}

#[test]
fn corrupting_a_live_head_forces_salvage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt-live.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.commit(|w| {
            w.add("gone".to_string(), 1);
            w.add("kept".to_string(), 2);
        });
    }

    // Find a live record head by scanning the raw container, then smash it.
    let target = {
        let mut view = View::open(&path, &key()).unwrap();
        let mut block = [0u8; BLOCK_PAYLOAD];
        let mut found = None;
        for i in 0..view.count() {
            assert!(view.read_block(i, &mut block, 0));
            let size = u64::from_be_bytes(block[8..16].try_into().unwrap());
            if size != 0 && size != u64::MAX {
                found = Some(i);
                break;
            }
        }
        found.expect("no record head")
    };
    flip_byte(&path, target);

    let store: Store<String, u64> = open_store(&path);
    assert_ne!(store.error_bits() & error_bits::SALVAGED, 0);
    // The undamaged record survives salvage.
    store.read(|r| assert_eq!(r.len(), 1));
}

#[test]
fn removal_is_durable_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remove.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.commit(|w| {
            w.add("stay".to_string(), 1);
            w.add("go".to_string(), 2);
        });
        store.commit(|w| {
            assert!(w.remove(&"go".to_string()));
            assert!(!w.remove(&"go".to_string()));
        });
        store.read(|r| {
            assert_eq!(r.len(), 1);
            assert_eq!(r.get(&"go".to_string()), None);
        });
    }

    let store: Store<String, u64> = open_store(&path);
    assert_eq!(store.error_bits(), 0);
    store.read(|r| {
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(&"stay".to_string()), Some(&1));
        assert_eq!(r.get(&"go".to_string()), None);
    });

    // A removed key can come back.
    store.commit(|w| {
        w.add("go".to_string(), 3);
    });
    drop(store);

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| assert_eq!(r.get(&"go".to_string()), Some(&3)));
}

#[test]
fn uncommitted_removal_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remove-crash.db");

    let store: Store<String, u64> = open_store(&path);
    store.commit(|w| {
        w.add("x".to_string(), 1);
    });
    store.write(|w| {
        w.remove(&"x".to_string());
    });
    std::mem::forget(store);

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| assert_eq!(r.get(&"x".to_string()), Some(&1)));
    assert_eq!(store.error_bits() & error_bits::SALVAGED, 0);
}

#[test]
fn many_generations_converge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.db");

    {
        let store: Store<String, u64> = open_store(&path);
        for round in 0..20u64 {
            store.commit(|w| {
                // `add` keeps an existing entry's value; update through
                // the returned reference.
                *w.add(format!("key-{}", round % 5), round) = round;
            });
        }
    }

    let store: Store<String, u64> = open_store(&path);
    assert_eq!(store.error_bits(), 0);
    store.read(|r| {
        assert_eq!(r.len(), 5);
        for slot in 0..5u64 {
            // Each slot keeps the value of the last round that wrote it.
            let expect = (15..20).find(|round| round % 5 == slot).unwrap();
            assert_eq!(r.get(&format!("key-{slot}")), Some(&expect));
        }
    });
}

#[test]
fn drop_commits_pending_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drop.db");

    {
        let store: Store<String, u64> = open_store(&path);
        store.write(|w| {
            w.add("pending".to_string(), 5);
        });
        // No explicit commit: the store's destructor runs one.
    }

    let store: Store<String, u64> = open_store(&path);
    store.read(|r| assert_eq!(r.get(&"pending".to_string()), Some(&5)));
}

#[test]
fn iter_lists_live_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("iter.db");

    let store: Store<String, u64> = open_store(&path);
    store.commit(|w| {
        w.add("a".to_string(), 1);
        w.add("b".to_string(), 2);
        w.add("c".to_string(), 3);
        w.remove(&"b".to_string());
    });

    let mut seen = store.read(|r| r.iter().map(|(k, v)| (k.clone(), *v)).collect::<Vec<_>>());
    seen.sort();
    assert_eq!(seen, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
}

/// Flips one ciphertext byte inside physical block `index`.
fn flip_byte(path: &Path, index: u64) {
    let mut bytes = std::fs::read(path).unwrap();
    let offset = index as usize * RAW_BLOCK_SIZE + 100;
    bytes[offset] ^= 0xFF;
    std::fs::write(path, &bytes).unwrap();
}
