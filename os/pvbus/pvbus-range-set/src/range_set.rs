use crate::error::RangeSetError;
use alloc::vec::Vec;
use core::fmt;
use core::iter::FusedIterator;
use log::error;

/// Index of the list head in the slot arena. It never holds a range.
const SENTINEL: usize = 0;

#[derive(Clone, Copy, Default)]
struct Slot {
    start: i64,
    end: i64,
    prev: usize,
    next: usize,
}

/// An ordered set of `i64` values stored as disjoint, non-touching closed
/// ranges `[start, end]`.
///
/// Every operation begins at the range touched last (the cursor) and walks
/// from there, so runs of neighboring identifiers being withdrawn and
/// returned cost O(1) each.
///
/// Ranges live in a slot arena linked through `prev`/`next` indices, with
/// slot 0 as the circular list head. A slot that falls out of the list is
/// kept as the single spare for the next insertion; any further free slot is
/// compacted away immediately.
///
/// Not synchronized. Owners that share a set put it behind their own lock.
pub struct RangeSet {
    slots: Vec<Slot>,
    cursor: usize,
    spare: Option<usize>,
    count: u64,
}

impl RangeSet {
    /// Create an empty set.
    ///
    /// # Errors
    /// [`RangeSetError::OutOfMemory`] if the list head cannot be allocated.
    pub fn new() -> Result<Self, RangeSetError> {
        let mut slots = Vec::new();
        if slots.try_reserve(2).is_err() {
            error!("range set: cannot allocate list head");
            return Err(RangeSetError::OutOfMemory);
        }
        slots.push(Slot::default());

        let set = Self {
            slots,
            cursor: SENTINEL,
            spare: None,
            count: 0,
        };
        set.audited();
        Ok(set)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots[SENTINEL].next == SENTINEL
    }

    /// Number of values held.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.count
    }

    /// Remove and return the smallest value.
    ///
    /// # Panics
    /// If the set is empty.
    pub fn pop(&mut self) -> i64 {
        assert!(!self.is_empty(), "pop from an empty range set");

        self.cursor = self.slots[SENTINEL].next;
        let range = &mut self.slots[self.cursor];
        let item = range.start;

        if item == range.end {
            self.remove(true);
        } else {
            range.start += 1;
        }
        self.count -= 1;

        self.audited();
        item
    }

    /// Add `[start, end]`, merging with any range it touches.
    ///
    /// # Errors
    /// [`RangeSetError::OutOfMemory`] if a range node is needed and cannot be
    /// allocated. The set is left as it was.
    ///
    /// # Panics
    /// If `start > end`, if any value of `[start, end]` is already held, or
    /// if the set would hold more than `u64::MAX` values.
    pub fn put(&mut self, start: i64, end: i64) -> Result<(), RangeSetError> {
        assert!(start <= end, "inverted range [{start}, {end}]");

        let added = end.abs_diff(start).checked_add(1);
        let Some(count) = added.and_then(|added| self.count.checked_add(added)) else {
            panic!("range set count overflows adding [{start}, {end}]");
        };

        let node = self.allocate()?;

        if self.is_empty() {
            self.cursor = SENTINEL;
            self.link(node, start, end, true);
        } else {
            let current = self.slots[self.cursor];
            if start > current.end {
                self.cursor = self.seek_forward(start, end);
                self.link(node, start, end, false);
            } else {
                assert!(
                    end < current.start,
                    "[{start}, {end}] overlaps [{}, {}]",
                    current.start,
                    current.end
                );
                self.cursor = self.seek_backward(start, end);
                self.link(node, start, end, true);
            }
        }
        self.count = count;

        self.audited();
        Ok(())
    }

    /// Remove exactly `item`, shrinking, deleting, or splitting the range
    /// that holds it.
    ///
    /// # Errors
    /// [`RangeSetError::OutOfMemory`] if `item` lies strictly inside a range
    /// and the node for the upper half cannot be allocated. The set is left
    /// as it was.
    ///
    /// # Panics
    /// If `item` is not in the set.
    pub fn get(&mut self, item: i64) -> Result<(), RangeSetError> {
        assert!(!self.is_empty(), "get({item}) from an empty range set");

        let mut cursor = self.cursor;
        let mut range = self.slots[cursor];
        if item < range.start {
            while item < range.start {
                cursor = range.prev;
                assert_ne!(cursor, SENTINEL, "get({item}): value not present");
                range = self.slots[cursor];
            }
        } else if item > range.end {
            while item > range.end {
                cursor = range.next;
                assert_ne!(cursor, SENTINEL, "get({item}): value not present");
                range = self.slots[cursor];
            }
        }
        self.cursor = cursor;

        assert!(
            range.start <= item && item <= range.end,
            "get({item}): value not present"
        );

        if range.start == range.end {
            self.remove(true);
        } else if item == range.start {
            self.slots[cursor].start += 1;
        } else if item == range.end {
            self.slots[cursor].end -= 1;
        } else {
            let node = self.allocate()?;
            // Allocation may have grown the arena; `cursor` is still valid.
            self.slots[cursor].end = item - 1;
            self.link(node, item + 1, range.end, true);
        }
        self.count -= 1;

        self.audited();
        Ok(())
    }

    /// Whether `item` is held. Leaves the cursor alone.
    #[must_use]
    pub fn contains(&self, item: i64) -> bool {
        self.iter()
            .take_while(|&(start, _)| start <= item)
            .any(|(_, end)| item <= end)
    }

    /// The ranges in ascending order.
    #[must_use]
    pub fn iter(&self) -> Ranges<'_> {
        Ranges {
            set: self,
            slot: self.slots[SENTINEL].next,
        }
    }

    /// Release a set that must be empty.
    ///
    /// # Panics
    /// If any value is still held.
    pub fn teardown(self) {
        assert!(
            self.is_empty(),
            "range set torn down holding {} values",
            self.count
        );
    }

    /// Check every structural invariant.
    ///
    /// # Panics
    /// On the first violation: unordered or touching ranges, an inverted
    /// range, broken back links, an unreachable cursor, a count that does
    /// not match the ranges, or more than one unlinked slot.
    pub fn audit(&self) {
        let head = self.slots[SENTINEL];

        if head.next == SENTINEL {
            assert_eq!(head.prev, SENTINEL, "empty list with a tail");
            assert_eq!(self.cursor, SENTINEL, "empty set with a cursor");
            assert_eq!(self.count, 0, "empty set with count {}", self.count);
        } else {
            assert_ne!(self.cursor, SENTINEL, "non-empty set without a cursor");
        }

        let mut found_cursor = self.cursor == SENTINEL;
        let mut linked = 0_usize;
        let mut count = 0_u64;
        let mut previous = SENTINEL;
        let mut slot = head.next;

        while slot != SENTINEL {
            let range = self.slots[slot];
            assert_eq!(range.prev, previous, "slot {slot}: broken back link");
            assert!(
                range.start <= range.end,
                "inverted range [{}, {}]",
                range.start,
                range.end
            );

            if range.next != SENTINEL {
                let next = self.slots[range.next];
                assert!(
                    range.end.checked_add(1).is_some_and(|end| end < next.start),
                    "[{}, {}] and [{}, {}] are out of order or touching",
                    range.start,
                    range.end,
                    next.start,
                    next.end
                );
            }

            found_cursor |= slot == self.cursor;
            count += range.end.abs_diff(range.start) + 1;
            linked += 1;
            previous = slot;
            slot = range.next;
        }

        assert_eq!(head.prev, previous, "list tail is stale");
        assert!(found_cursor, "cursor {} is not on the list", self.cursor);
        assert_eq!(count, self.count, "count disagrees with the ranges");

        let unlinked = self.slots.len() - 1 - linked;
        assert_eq!(
            unlinked,
            usize::from(self.spare.is_some()),
            "{unlinked} unlinked slots"
        );
    }

    #[inline]
    #[cfg_attr(not(feature = "audit"), allow(clippy::unused_self))]
    fn audited(&self) {
        #[cfg(feature = "audit")]
        self.audit();
    }

    /// Find the insertion point for a range above the cursor: the first
    /// range that starts after it, or the list head.
    fn seek_forward(&self, start: i64, end: i64) -> usize {
        let mut slot = self.slots[self.cursor].next;
        while slot != SENTINEL {
            let range = self.slots[slot];
            if start < range.start {
                assert!(
                    end < range.start,
                    "[{start}, {end}] overlaps [{}, {}]",
                    range.start,
                    range.end
                );
                break;
            }
            assert!(
                start > range.end,
                "[{start}, {end}] overlaps [{}, {}]",
                range.start,
                range.end
            );
            slot = range.next;
        }
        slot
    }

    /// Find the insertion point for a range below the cursor: the last
    /// range that ends before it, or the list head.
    fn seek_backward(&self, start: i64, end: i64) -> usize {
        let mut slot = self.slots[self.cursor].prev;
        while slot != SENTINEL {
            let range = self.slots[slot];
            if end > range.end {
                assert!(
                    start > range.end,
                    "[{start}, {end}] overlaps [{}, {}]",
                    range.start,
                    range.end
                );
                break;
            }
            assert!(
                end < range.start,
                "[{start}, {end}] overlaps [{}, {}]",
                range.start,
                range.end
            );
            slot = range.prev;
        }
        slot
    }

    /// An unlinked slot: the spare if there is one, otherwise a new one.
    fn allocate(&mut self) -> Result<usize, RangeSetError> {
        if let Some(spare) = self.spare.take() {
            return Ok(spare);
        }

        if self.slots.try_reserve(1).is_err() {
            error!("range set: cannot allocate a range node");
            return Err(RangeSetError::OutOfMemory);
        }
        self.slots.push(Slot::default());
        Ok(self.slots.len() - 1)
    }

    /// Link `node` as `[start, end]` after (or before) the cursor, make it
    /// the cursor, and merge it with its neighbors.
    fn link(&mut self, node: usize, start: i64, end: i64, after: bool) {
        let (prev, next) = if after {
            (self.cursor, self.slots[self.cursor].next)
        } else {
            (self.slots[self.cursor].prev, self.cursor)
        };

        self.slots[node] = Slot {
            start,
            end,
            prev,
            next,
        };
        self.slots[prev].next = node;
        self.slots[next].prev = node;
        self.cursor = node;

        self.merge_backward();
        self.merge_forward();
    }

    fn merge_backward(&mut self) {
        let range = self.slots[self.cursor];
        if range.prev == SENTINEL {
            return;
        }

        let previous = &mut self.slots[range.prev];
        if previous.end.checked_add(1) != Some(range.start) {
            return;
        }
        previous.end = range.end;
        self.remove(false);
    }

    fn merge_forward(&mut self) {
        let range = self.slots[self.cursor];
        if range.next == SENTINEL {
            return;
        }

        let next = &mut self.slots[range.next];
        if range.end.checked_add(1) != Some(next.start) {
            return;
        }
        next.start = range.start;
        self.remove(true);
    }

    /// Unlink the cursor range and move the cursor to its successor (or
    /// predecessor), wrapping around the list head.
    fn remove(&mut self, after: bool) {
        let slot = self.cursor;
        debug_assert_ne!(slot, SENTINEL);
        let Slot { prev, next, .. } = self.slots[slot];

        self.slots[prev].next = next;
        self.slots[next].prev = prev;

        self.cursor = if after { next } else { prev };
        if self.cursor == SENTINEL {
            let head = self.slots[SENTINEL];
            self.cursor = if after { head.next } else { head.prev };
        }

        self.release(slot);
    }

    /// Keep `slot` as the spare, or compact it out of the arena if there
    /// already is one.
    fn release(&mut self, slot: usize) {
        if self.spare.is_none() {
            self.slots[slot] = Slot::default();
            self.spare = Some(slot);
            return;
        }

        let last = self.slots.len() - 1;
        self.slots.swap_remove(slot);
        if slot == last {
            return;
        }

        // The old last slot now lives at `slot`.
        if self.spare == Some(last) {
            self.spare = Some(slot);
            return;
        }
        let Slot { prev, next, .. } = self.slots[slot];
        self.slots[prev].next = slot;
        self.slots[next].prev = slot;
        if self.cursor == last {
            self.cursor = slot;
        }
    }
}

impl fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(start, end)| start..=end))
            .finish()
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = (i64, i64);
    type IntoIter = Ranges<'a>;

    fn into_iter(self) -> Ranges<'a> {
        self.iter()
    }
}

/// Ascending `(start, end)` pairs of a [`RangeSet`].
#[derive(Clone)]
pub struct Ranges<'a> {
    set: &'a RangeSet,
    slot: usize,
}

impl Iterator for Ranges<'_> {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<(i64, i64)> {
        if self.slot == SENTINEL {
            return None;
        }
        let range = self.set.slots[self.slot];
        self.slot = range.next;
        Some((range.start, range.end))
    }
}

impl FusedIterator for Ranges<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn ranges(set: &RangeSet) -> Vec<(i64, i64)> {
        set.iter().collect()
    }

    #[test]
    fn cursor_follows_the_last_touched_range() {
        let mut set = RangeSet::new().unwrap();
        set.put(0, 9).unwrap();
        set.put(20, 29).unwrap();
        set.put(40, 49).unwrap();
        assert_eq!(set.slots[set.cursor].start, 40);

        set.get(25).unwrap();
        assert_eq!(set.slots[set.cursor].start, 26, "upper half of the split");

        set.get(3).unwrap();
        assert_eq!(set.slots[set.cursor].start, 4);
        set.audit();
    }

    #[test]
    fn emptied_range_becomes_the_spare() {
        let mut set = RangeSet::new().unwrap();
        set.put(5, 5).unwrap();
        assert_eq!(set.slots.len(), 2);

        assert_eq!(set.pop(), 5);
        assert_eq!(set.spare, Some(1));
        assert_eq!(set.cursor, SENTINEL);

        // The next insertion reuses the spare instead of growing.
        set.put(7, 8).unwrap();
        assert_eq!(set.spare, None);
        assert_eq!(set.slots.len(), 2);
        set.audit();
    }

    #[test]
    fn second_free_slot_is_compacted() {
        let mut set = RangeSet::new().unwrap();
        set.put(0, 0).unwrap();
        set.put(2, 2).unwrap();
        set.put(4, 4).unwrap();
        assert_eq!(set.slots.len(), 4);

        // Filling the gaps merges everything into one range.
        set.put(1, 1).unwrap();
        set.put(3, 3).unwrap();
        assert_eq!(ranges(&set), vec![(0, 4)]);
        assert!(set.spare.is_some());
        assert_eq!(set.slots.len(), 3, "one live range, one spare, the head");
        set.audit();

        for expected in 0..=4 {
            assert_eq!(set.pop(), expected);
        }
        assert!(set.is_empty());
        set.audit();
    }

    #[test]
    fn compaction_moves_the_cursor_slot() {
        let mut set = RangeSet::new().unwrap();
        set.put(10, 10).unwrap();
        set.put(30, 30).unwrap();
        set.put(50, 50).unwrap();
        set.put(70, 70).unwrap();

        // Pops release slot 1 as the spare, then compact slot 2 away, which
        // relocates the range in the last slot.
        assert_eq!(set.pop(), 10);
        assert_eq!(set.pop(), 30);
        assert_eq!(set.slots.len(), 4);
        set.audit();

        set.get(70).unwrap();
        set.get(50).unwrap();
        assert!(set.is_empty());
        set.audit();
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let mut set = RangeSet::new().unwrap();
        set.put(i64::MAX - 1, i64::MAX).unwrap();
        set.put(i64::MIN, i64::MIN + 1).unwrap();
        assert_eq!(set.len(), 4);

        set.get(i64::MAX).unwrap();
        assert_eq!(set.pop(), i64::MIN);
        set.put(i64::MAX, i64::MAX).unwrap();
        assert_eq!(ranges(&set), vec![(i64::MIN + 1, i64::MIN + 1), (i64::MAX - 1, i64::MAX)]);
        set.audit();
    }

    #[test]
    fn debug_lists_the_ranges() {
        let mut set = RangeSet::new().unwrap();
        set.put(1, 3).unwrap();
        set.put(7, 7).unwrap();
        assert_eq!(alloc::format!("{set:?}"), "[1..=3, 7..=7]");
    }
}
