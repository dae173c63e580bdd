//! The keyed map over block runs: guarded access, copy-on-write persist,
//! terminator commits, and three-phase recovery.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

use coffer_codec::{encode_with, Persist, Reader as RecordReader};
use coffer_storage::{View, BLOCK_PAYLOAD};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error_bits;
use crate::freespace::FreeSpace;
use crate::hash::{CombinedHash, COMBINED_HASH_SIZE};
use crate::layout::{
    BlockHead, BLOCK_DATA, CONTINUATION, HEADER_SIZE, MAX_ORDER, MAX_RECORD_SIZE, NO_BLOCK,
};

/// Persistence state of one entry.
#[derive(Default, Clone, Copy)]
struct Control {
    /// Sequence number of the entry's current run; 0 marks a dirty
    /// (unwritten) entry.
    order: u64,
    /// Run confirmed by the last terminator; freed when superseded.
    load_block: u32,
    load_count: u32,
    /// Run written since the last terminator; promoted to `load_*` by the
    /// next commit.
    new_block: u32,
    new_count: u32,
}

struct Slot<V> {
    ctrl: Control,
    /// Dead slots are tombstones: the key's removal is itself a record, so
    /// a deletion survives recovery like any other update. The store never
    /// compacts, so the tombstone keeps its block until the key is reused.
    alive: bool,
    value: V,
}

struct Inner<K, V> {
    map: HashMap<K, Slot<V>>,
    free: FreeSpace,
    view: Option<View>,
    hash: CombinedHash,
    error: u32,
    /// Block index of the live terminator; `NO_BLOCK` before the first
    /// commit.
    last_term: u32,
    /// Highest sequence number handed out.
    order_seq: u64,
    /// Sequence number of the last durable terminator.
    flush_order: u64,
}

/// Recovery pass.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    /// Accept every verified block and hope the newest terminator agrees.
    Optimistic,
    /// Discard blocks newer than the chosen terminator.
    Rollback,
    /// Keep whatever verifies; no terminator is trusted.
    Salvage,
}

/// A crash-consistent keyed map stored as encrypted block runs.
///
/// All access happens under a single exclusive guard through the closure
/// APIs: [`read`](Store::read), [`write`](Store::write) and
/// [`commit`](Store::commit). Reads never run concurrently with anything —
/// a reader/writer lock is deliberately not used, because writer teardown
/// mutates shared state that concurrent readers could observe half-way.
///
/// Mutations performed in a `write` scope are persisted to fresh blocks
/// when the scope ends but become durable only at the next commit, which
/// flushes data, writes a terminator block carrying the combined hash of
/// the live record set, and flushes again. A crash anywhere before the
/// terminator is durable loses only the in-flight generation.
///
/// Dropping the store runs one final commit.
pub struct Store<K: Persist + Eq + Hash, V: Persist> {
    inner: Mutex<Inner<K, V>>,
}

impl<K: Persist + Eq + Hash, V: Persist> Store<K, V> {
    /// Creates a detached store whose combined hash is keyed with `salt`.
    pub fn new(salt: &[u8]) -> Self {
        Store {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                free: FreeSpace::default(),
                view: None,
                hash: CombinedHash::new(salt),
                error: 0,
                last_term: NO_BLOCK,
                order_seq: 0,
                flush_order: 0,
            }),
        }
    }

    /// Attaches a backing view and recovers the map from it.
    ///
    /// A container that has never committed (including a brand-new file)
    /// gets an empty terminator immediately, so a live terminator exists
    /// from here on.
    pub fn init(&self, view: View) {
        let mut inner = self.inner.lock();
        inner.view = Some(view);
        inner.reload();
        if inner.last_term == NO_BLOCK {
            inner.finalize();
        }
    }

    /// Runs `f` with read access under the store's guard.
    pub fn read<R>(&self, f: impl FnOnce(&Reader<'_, K, V>) -> R) -> R {
        let inner = self.inner.lock();
        f(&Reader { inner: &*inner })
    }

    /// Runs `f` with write access under the store's guard. When the scope
    /// ends, dirty entries are written to fresh blocks; no terminator is
    /// emitted, so the changes are not yet durable.
    pub fn write<R>(&self, f: impl FnOnce(&mut Writer<'_, K, V>) -> R) -> R {
        let mut inner = self.inner.lock();
        let mut writer = Writer {
            inner: &mut *inner,
            modified: false,
            commit: false,
        };
        f(&mut writer)
    }

    /// Like [`write`](Store::write), but the scope ends with a full
    /// commit: data flush, terminator, terminator flush.
    pub fn commit<R>(&self, f: impl FnOnce(&mut Writer<'_, K, V>) -> R) -> R {
        let mut inner = self.inner.lock();
        let mut writer = Writer {
            inner: &mut *inner,
            modified: false,
            commit: true,
        };
        f(&mut writer)
    }

    /// Standalone durability barrier: commits whatever has been written
    /// since the last terminator.
    pub fn flush(&self) {
        self.inner.lock().finalize();
    }

    /// Accumulated error bits; see [`crate::error_bits`].
    pub fn error_bits(&self) -> u32 {
        self.inner.lock().error
    }

    /// Blocks currently held by the backing container.
    pub fn block_count(&self) -> u64 {
        self.inner.lock().view.as_ref().map_or(0, View::count)
    }

    /// Snapshot of the free-space intervals, for diagnostics.
    pub fn free_intervals(&self) -> Vec<(u32, u32)> {
        self.inner.lock().free.intervals()
    }
}

impl<K: Persist + Eq + Hash, V: Persist> Drop for Store<K, V> {
    fn drop(&mut self) {
        self.inner.get_mut().finalize();
    }
}

/// Read access to the map, valid inside a [`Store::read`] scope.
pub struct Reader<'a, K: Persist + Eq + Hash, V: Persist> {
    inner: &'a Inner<K, V>,
}

impl<K: Persist + Eq + Hash, V: Persist> Reader<'_, K, V> {
    /// Looks up a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner
            .map
            .get(key)
            .filter(|slot| slot.alive)
            .map(|slot| &slot.value)
    }

    /// Iterates over the live entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner
            .map
            .iter()
            .filter(|(_, slot)| slot.alive)
            .map(|(key, slot)| (key, &slot.value))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.map.values().filter(|slot| slot.alive).count()
    }

    /// True when no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Write access to the map, valid inside a [`Store::write`] or
/// [`Store::commit`] scope. Dirty entries are persisted when the guard
/// drops, even if the closure unwinds.
pub struct Writer<'a, K: Persist + Eq + Hash, V: Persist> {
    inner: &'a mut Inner<K, V>,
    modified: bool,
    commit: bool,
}

impl<K: Persist + Eq + Hash, V: Persist> Writer<'_, K, V> {
    /// Mutable access to an existing entry; marks it dirty.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.inner.map.get(key).is_some_and(|slot| slot.alive) {
            return None;
        }
        self.modified = true;

        let Inner { map, hash, .. } = &mut *self.inner;
        let slot = map.get_mut(key)?;
        mark_dirty(hash, &mut slot.ctrl);
        Some(&mut slot.value)
    }

    /// Inserts the entry if absent (reviving a tombstone counts as absent)
    /// and returns it mutably, marked dirty either way.
    pub fn add(&mut self, key: K, value: V) -> &mut V {
        self.modified = true;

        let Inner { map, hash, .. } = &mut *self.inner;
        let slot = match map.entry(key) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if !slot.alive {
                    slot.alive = true;
                    slot.value = value;
                }
                slot
            }
            Entry::Vacant(entry) => entry.insert(Slot {
                ctrl: Control::default(),
                alive: true,
                value,
            }),
        };
        mark_dirty(hash, &mut slot.ctrl);
        &mut slot.value
    }

    /// Inserts the entry if absent and returns it read-only. An entry that
    /// already exists is left clean.
    pub fn insert(&mut self, key: K, value: V) -> &V {
        let revive = self.inner.map.get(&key).map_or(true, |slot| !slot.alive);
        if revive {
            self.modified = true;
        }

        let Inner { map, hash, .. } = &mut *self.inner;
        let slot = match map.entry(key) {
            Entry::Occupied(entry) => {
                let slot = entry.into_mut();
                if !slot.alive {
                    slot.alive = true;
                    slot.value = value;
                    mark_dirty(hash, &mut slot.ctrl);
                }
                slot
            }
            Entry::Vacant(entry) => entry.insert(Slot {
                ctrl: Control::default(),
                alive: true,
                value,
            }),
        };
        &slot.value
    }

    /// Non-mutating lookup.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner
            .map
            .get(key)
            .filter(|slot| slot.alive)
            .map(|slot| &slot.value)
    }

    /// Removes a key. The removal is recorded as a tombstone run, so it
    /// survives recovery exactly like an update; the key's previous blocks
    /// are reclaimed at the next commit. Returns whether the key was live.
    pub fn remove(&mut self, key: &K) -> bool {
        let Inner { map, hash, .. } = &mut *self.inner;
        let Some(slot) = map.get_mut(key) else {
            return false;
        };
        if !slot.alive {
            return false;
        }

        if slot.ctrl.order == 0 && slot.ctrl.load_count == 0 && slot.ctrl.new_count == 0 {
            // Never reached disk: no tombstone needed.
            map.remove(key);
        } else {
            mark_dirty(hash, &mut slot.ctrl);
            slot.alive = false;
            slot.value = V::default();
        }
        self.modified = true;
        true
    }
}

impl<K: Persist + Eq + Hash, V: Persist> Drop for Writer<'_, K, V> {
    fn drop(&mut self) {
        if self.modified {
            self.inner.persist_dirty();
        }
        if self.commit {
            self.inner.finalize();
        }
    }
}

/// XORs a run's `(order, head block)` tuple in or out of the combined hash.
fn xor_order(hash: &mut CombinedHash, order: u64, block: u32) {
    let mut tuple = [0u8; 16];
    tuple[..8].copy_from_slice(&order.to_be_bytes());
    tuple[8..].copy_from_slice(&(block as u64).to_be_bytes());
    hash.combine(&tuple);
}

/// Marks an entry dirty, withdrawing its hash contribution.
fn mark_dirty(hash: &mut CombinedHash, ctrl: &mut Control) {
    if ctrl.order != 0 {
        let head = if ctrl.new_count != 0 {
            ctrl.new_block
        } else {
            ctrl.load_block
        };
        xor_order(hash, ctrl.order, head);
        ctrl.order = 0;
    }
}

/// Writes one entry as a fresh block run.
fn persist_entry<K: Persist, V: Persist>(
    key: &K,
    slot: &mut Slot<V>,
    view: &mut View,
    free: &mut FreeSpace,
    hash: &mut CombinedHash,
    order_seq: &mut u64,
    error: &mut u32,
) {
    let bytes = encode_with(|w| {
        key.save(w);
        slot.alive.save(w);
        if slot.alive {
            slot.value.save(w);
        }
    });

    let count = bytes.len().div_ceil(BLOCK_DATA) as u32;
    debug_assert!(count >= 1);

    mark_dirty(hash, &mut slot.ctrl);
    *order_seq += 1;
    slot.ctrl.order = *order_seq;

    // A run of the same length is rewritten in place (the blocks get fresh
    // nonces anyway); a different length reallocates.
    if slot.ctrl.new_count != count {
        free.add_free(slot.ctrl.new_block, slot.ctrl.new_count);
        slot.ctrl.new_block = free.get_free(count);
        slot.ctrl.new_count = count;
    }

    xor_order(hash, slot.ctrl.order, slot.ctrl.new_block);

    let mut block = [0u8; BLOCK_PAYLOAD];
    for i in 0..count {
        BlockHead {
            order: slot.ctrl.order,
            size: if i == 0 {
                bytes.len() as u64
            } else {
                CONTINUATION
            },
        }
        .emit(&mut block);

        let from = i as usize * BLOCK_DATA;
        let chunk = (bytes.len() - from).min(BLOCK_DATA);
        block[HEADER_SIZE..HEADER_SIZE + chunk].copy_from_slice(&bytes[from..from + chunk]);
        block[HEADER_SIZE + chunk..].fill(0);

        if !view.write_block(slot.ctrl.new_block as u64 + i as u64, &block, 0) {
            warn!(
                block = slot.ctrl.new_block as u64 + i as u64,
                "record write failed, entry rolled back"
            );
            free.add_free(slot.ctrl.new_block, slot.ctrl.new_count);
            xor_order(hash, slot.ctrl.order, slot.ctrl.new_block);
            slot.ctrl.new_block = 0;
            slot.ctrl.new_count = 0;
            slot.ctrl.order = 0;
            *error |= error_bits::WRITE_FAILED;
            *order_seq -= 1;
            return;
        }
    }
}

impl<K: Persist + Eq + Hash, V: Persist> Inner<K, V> {
    /// Writes every dirty entry.
    fn persist_dirty(&mut self) {
        let Inner {
            map,
            free,
            view,
            hash,
            error,
            order_seq,
            ..
        } = self;
        let Some(view) = view.as_mut() else {
            return;
        };

        for (key, slot) in map.iter_mut() {
            if slot.ctrl.order == 0 {
                persist_entry(key, slot, view, free, hash, order_seq, error);
            }
        }
    }

    /// Commits the current generation: dirty entries, data flush,
    /// terminator, terminator flush, then run promotion.
    fn finalize(&mut self) {
        if self.view.is_none() {
            return;
        }
        if self.order_seq <= self.flush_order && self.last_term != NO_BLOCK {
            return;
        }

        self.persist_dirty();

        let Inner {
            map,
            free,
            view,
            hash,
            error,
            order_seq,
            last_term,
            flush_order,
        } = self;
        let Some(view) = view.as_mut() else {
            return;
        };

        // Data blocks must be durable before the terminator points at them.
        view.flush();

        let term_block = free.get_free(1);
        *order_seq += 1;

        let mut block = [0u8; BLOCK_PAYLOAD];
        BlockHead {
            order: *order_seq,
            size: 0,
        }
        .emit(&mut block);
        block[HEADER_SIZE..HEADER_SIZE + COMBINED_HASH_SIZE].copy_from_slice(&hash.dump());

        if !view.write_block(term_block as u64, &block, 0) {
            warn!(block = term_block, "terminator write failed, commit aborted");
            *order_seq -= 1;
            *error |= error_bits::TERMINATOR_WRITE_FAILED;
            free.add_free(term_block, 1);
            return;
        }

        // The linearization point: after this flush the new generation is
        // the one recovery lands on.
        view.flush();

        if *last_term != NO_BLOCK {
            free.add_free(*last_term, 1);
        }
        *last_term = term_block;
        *flush_order = *order_seq;

        for slot in map.values_mut() {
            let ctrl = &mut slot.ctrl;
            if ctrl.new_count != 0 {
                free.add_free(ctrl.load_block, ctrl.load_count);
                ctrl.load_block = ctrl.new_block;
                ctrl.load_count = ctrl.new_count;
                ctrl.new_block = 0;
                ctrl.new_count = 0;
            }
        }
    }

    /// Rebuilds the map from the backing view, converging in up to three
    /// passes.
    fn reload(&mut self) {
        let mut phase = Phase::Optimistic;
        let mut limit = 0u64;

        loop {
            let snapshot = self.scan(phase, limit);

            match phase {
                Phase::Optimistic => {
                    // `order_seq` is the chosen terminator's order here.
                    self.flush_order = self.order_seq;
                    if self.hash.check(&snapshot) {
                        debug!(
                            entries = self.map.len(),
                            order = self.order_seq,
                            "store recovered"
                        );
                        return;
                    }
                    limit = self.flush_order;
                    phase = Phase::Rollback;
                }
                Phase::Rollback => {
                    if self.hash.check(&snapshot) {
                        // Rolled back to the last committed generation.
                        // `order_seq` saw every verified block, so new
                        // orders stay ahead of the discarded ones.
                        self.flush_order = self.order_seq;
                        info!(
                            entries = self.map.len(),
                            error = self.error,
                            "store rolled back to last committed generation"
                        );
                        return;
                    }
                    phase = Phase::Salvage;
                }
                Phase::Salvage => {
                    self.flush_order = 0;
                    self.error |= error_bits::SALVAGED;
                    warn!(
                        entries = self.map.len(),
                        error = self.error,
                        "store salvaged, contents are best-effort"
                    );
                    return;
                }
            }
        }
    }

    /// One recovery pass. Returns the hash snapshot of the terminator the
    /// pass settled on (zeros when there is none).
    fn scan(&mut self, phase: Phase, limit: u64) -> [u8; COMBINED_HASH_SIZE] {
        let Inner {
            map,
            free,
            view,
            hash,
            error,
            order_seq,
            last_term,
            ..
        } = self;

        map.clear();
        free.clear();
        hash.clear();
        *order_seq = 0;
        *last_term = NO_BLOCK;

        let mut snapshot = [0u8; COMBINED_HASH_SIZE];
        let Some(view) = view.as_mut() else {
            return snapshot;
        };

        let count = view.count().min(NO_BLOCK as u64) as u32;
        // Everything past the last block is free.
        free.add_free(count, 0u32.wrapping_sub(count));

        let mut block = [0u8; BLOCK_PAYLOAD];
        let mut record: Vec<u8> = Vec::new();

        let mut i: u32 = 0;
        while i < count {
            let this = i;
            i += 1;

            if !view.read_block(this as u64, &mut block, 0) {
                *error |= error_bits::DECRYPT_FAILED;
                free.add_free(this, 1);
                continue;
            }

            let head = BlockHead::parse(&block);

            if head.order == 0 || head.order > MAX_ORDER {
                *error |= error_bits::BAD_HEADER;
                free.add_free(this, 1);
                continue;
            }

            if head.size >= MAX_RECORD_SIZE {
                if head.size != CONTINUATION {
                    *error |= error_bits::BAD_HEADER;
                }
                // Orphan continuations are freed without comment; they are
                // the residue of partially overwritten or removed runs.
                free.add_free(this, 1);
                continue;
            }

            if phase != Phase::Optimistic && head.order > *order_seq {
                *order_seq = head.order;
            }

            if phase == Phase::Rollback && head.order > limit {
                *error |= error_bits::ORDER_AHEAD;
                free.add_free(this, 1);
                continue;
            }

            if head.size == 0 {
                // A terminator.
                match phase {
                    Phase::Optimistic => {
                        if head.order > *order_seq {
                            if *last_term != NO_BLOCK {
                                free.add_free(*last_term, 1);
                            }
                            snapshot.copy_from_slice(
                                &block[HEADER_SIZE..HEADER_SIZE + COMBINED_HASH_SIZE],
                            );
                            *order_seq = head.order;
                            *last_term = this;
                        } else {
                            free.add_free(this, 1);
                        }
                    }
                    Phase::Rollback => {
                        if head.order == limit {
                            snapshot.copy_from_slice(
                                &block[HEADER_SIZE..HEADER_SIZE + COMBINED_HASH_SIZE],
                            );
                            *last_term = this;
                        } else {
                            free.add_free(this, 1);
                        }
                    }
                    Phase::Salvage => {
                        free.add_free(this, 1);
                    }
                }
                continue;
            }

            // A record head: reassemble its run.
            let size = head.size as usize;
            let need = size.div_ceil(BLOCK_DATA) as u32;
            let run_start = this;

            if count - run_start < need {
                // The claimed run does not fit in the file. Free the head;
                // whatever continuations it really had are freed as
                // orphans when the scan reaches them.
                *error |= error_bits::RUN_SIZE_MISMATCH;
                free.add_free(this, 1);
                continue;
            }

            record.clear();
            record.reserve(size);
            record.extend_from_slice(&block[HEADER_SIZE..HEADER_SIZE + size.min(BLOCK_DATA)]);

            let mut intact = true;
            while record.len() < size {
                let next = i;
                if !view.read_block(next as u64, &mut block, 0) {
                    *error |= error_bits::TRUNCATED_RUN;
                    free.add_free(run_start, next - run_start + 1);
                    i = next + 1;
                    intact = false;
                    break;
                }

                let cont = BlockHead::parse(&block);
                if cont.order != head.order || cont.size != CONTINUATION {
                    // The tail of this run was overwritten by a younger
                    // one. Free what was ours and rescan this block fresh.
                    *error |= error_bits::TRUNCATED_RUN;
                    free.add_free(run_start, next - run_start);
                    i = next;
                    intact = false;
                    break;
                }

                let chunk = (size - record.len()).min(BLOCK_DATA);
                record.extend_from_slice(&block[HEADER_SIZE..HEADER_SIZE + chunk]);
                i = next + 1;
            }
            if !intact {
                continue;
            }

            let run_len = i - run_start;

            let mut reader = RecordReader::new(&record);
            let mut key = K::default();
            key.load(&mut reader);

            let slot = map.entry(key).or_insert_with(|| Slot {
                ctrl: Control::default(),
                alive: false,
                value: V::default(),
            });

            if slot.ctrl.order < head.order {
                if slot.ctrl.order != 0 {
                    // An older run of the same key loses.
                    xor_order(hash, slot.ctrl.order, slot.ctrl.load_block);
                    free.add_free(slot.ctrl.load_block, slot.ctrl.load_count);
                }
                slot.ctrl.order = head.order;
                slot.ctrl.load_block = run_start;
                slot.ctrl.load_count = run_len;

                let mut alive = false;
                alive.load(&mut reader);
                slot.alive = alive;
                slot.value = V::default();
                if alive {
                    slot.value.load(&mut reader);
                }

                xor_order(hash, head.order, run_start);
            } else {
                free.add_free(run_start, run_len);
            }
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_dirty_cancels_contribution() {
        let mut hash = CombinedHash::new(b"salt");
        let mut ctrl = Control {
            order: 5,
            load_block: 9,
            load_count: 1,
            new_block: 0,
            new_count: 0,
        };

        xor_order(&mut hash, 5, 9);
        mark_dirty(&mut hash, &mut ctrl);

        assert_eq!(ctrl.order, 0);
        assert!(hash.check(&[0u8; COMBINED_HASH_SIZE]));
    }

    #[test]
    fn mark_dirty_uses_the_fresh_run_when_present() {
        let mut hash = CombinedHash::new(b"salt");
        let mut ctrl = Control {
            order: 5,
            load_block: 9,
            load_count: 1,
            new_block: 17,
            new_count: 2,
        };

        // The live contribution points at the fresh run's head.
        xor_order(&mut hash, 5, 17);
        mark_dirty(&mut hash, &mut ctrl);
        assert!(hash.check(&[0u8; COMBINED_HASH_SIZE]));
    }
}
