//! Free-space interval index over the 32-bit block address space.

use std::collections::BTreeMap;

/// Sorted map of free intervals, `start → length`.
///
/// The empty map is a sentinel meaning the entire 2^32-block space is free;
/// it only carries that meaning before the first allocation. When an
/// allocation would otherwise empty the map, a zero-length dummy interval
/// is left behind so the sentinel state cannot be restored by accident.
#[derive(Default, Debug)]
pub(crate) struct FreeSpace {
    map: BTreeMap<u32, u32>,
}

impl FreeSpace {
    /// Drops every interval, restoring the untouched sentinel state.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns the free interval to the index, coalescing with both
    /// neighbors. Lengths saturate at the end of the address space.
    pub fn add_free(&mut self, start: u32, count: u32) {
        if count == 0 {
            return;
        }

        let mut start = start;
        let mut end = start as u64 + count as u64;

        if let Some((&prev_start, &prev_len)) = self.map.range(..=start).next_back() {
            let prev_end = prev_start as u64 + prev_len as u64;
            if prev_end >= start as u64 {
                end = end.max(prev_end);
                start = prev_start;
                self.map.remove(&prev_start);
            }
        }

        while let Some((&next_start, &next_len)) = self.map.range(start..).next() {
            if next_start as u64 > end {
                break;
            }
            end = end.max(next_start as u64 + next_len as u64);
            self.map.remove(&next_start);
        }

        let len = (end - start as u64).min(u32::MAX as u64) as u32;
        if len > 0 {
            self.map.insert(start, len);
        }
    }

    /// Takes `count` blocks from the smallest sufficient interval
    /// (best-fit) and returns its start.
    ///
    /// # Panics
    ///
    /// Panics when the non-empty index has no interval of `count` blocks:
    /// exhausting the 32-bit block space is a programmer error.
    pub fn get_free(&mut self, count: u32) -> u32 {
        let mut best: Option<(u32, u32)> = None;
        for (&start, &len) in &self.map {
            if len >= count && best.map_or(true, |(_, best_len)| best_len > len) {
                best = Some((start, len));
                if len == count {
                    break;
                }
            }
        }

        let Some((start, len)) = best else {
            if self.map.is_empty() {
                // First allocation ever: the whole space was free.
                if count > 0 {
                    self.map.insert(count, 0u32.wrapping_sub(count));
                }
                return 0;
            }
            panic!("free space exhausted: no run of {count} blocks");
        };

        self.map.remove(&start);
        let rest = len - count;
        if rest > 0 {
            self.map.insert(start + count, rest);
        } else if self.map.is_empty() {
            // Dummy interval: an emptied map must not read as "all free".
            self.map.insert(0, 0);
        }
        start
    }

    /// Snapshot of the intervals, for diagnostics and tests.
    pub fn intervals(&self) -> Vec<(u32, u32)> {
        self.map.iter().map(|(&s, &l)| (s, l)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_coalesced(space: &FreeSpace) {
        let intervals = space.intervals();
        for pair in intervals.windows(2) {
            let (a_start, a_len) = pair[0];
            let (b_start, _) = pair[1];
            assert!(
                (a_start as u64 + a_len as u64) < b_start as u64,
                "intervals {pair:?} overlap or touch"
            );
        }
    }

    #[test]
    fn first_allocation_carves_the_whole_space() {
        let mut space = FreeSpace::default();
        assert_eq!(space.get_free(4), 0);
        assert_eq!(space.intervals(), vec![(4, u32::MAX - 3)]);
    }

    #[test]
    fn add_free_coalesces_left_and_right() {
        let mut space = FreeSpace::default();
        space.add_free(10, 5);
        space.add_free(20, 5);
        assert_eq!(space.intervals(), vec![(10, 5), (20, 5)]);

        // Bridges both neighbors.
        space.add_free(15, 5);
        assert_eq!(space.intervals(), vec![(10, 15)]);
        assert_coalesced(&space);
    }

    #[test]
    fn add_free_absorbs_overlaps() {
        let mut space = FreeSpace::default();
        space.add_free(10, 4);
        space.add_free(12, 10);
        assert_eq!(space.intervals(), vec![(10, 12)]);

        space.add_free(8, 100);
        assert_eq!(space.intervals(), vec![(8, 100)]);
        assert_coalesced(&space);
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_interval() {
        let mut space = FreeSpace::default();
        space.add_free(0, 10);
        space.add_free(100, 3);
        space.add_free(200, 5);

        // The 3-block interval is the tightest fit.
        assert_eq!(space.get_free(3), 100);
        // Next tightest for 3 is the 5-block interval.
        assert_eq!(space.get_free(3), 200);
        assert_eq!(space.intervals(), vec![(0, 10), (203, 2)]);
    }

    #[test]
    fn emptied_map_keeps_a_dummy() {
        let mut space = FreeSpace::default();
        space.add_free(5, 2);
        assert_eq!(space.get_free(2), 5);

        // The dummy prevents the "everything free" sentinel from coming
        // back; the next request must panic instead of handing out space.
        assert_eq!(space.intervals(), vec![(0, 0)]);
    }

    #[test]
    #[should_panic(expected = "free space exhausted")]
    fn exhaustion_panics() {
        let mut space = FreeSpace::default();
        space.add_free(5, 2);
        space.get_free(2);
        space.get_free(1);
    }

    #[test]
    fn freeing_down_to_zero_joins_the_tail() {
        let mut space = FreeSpace::default();
        // Allocate the first 8 blocks, then free them all again.
        assert_eq!(space.get_free(8), 0);
        space.add_free(0, 8);
        // One interval spanning the whole space (clamped at the top).
        assert_eq!(space.intervals(), vec![(0, u32::MAX)]);
        assert_coalesced(&space);
    }
}
