//! Bounded "largest N files" collector.
//!
//! Backed by a min-heap of capacity K: the root is the smallest retained
//! record, so a candidate is admitted only when it beats that minimum. Each
//! walker branch owns its own tracker and merges into its parent after the
//! join, so no lock is taken on the hot path and no subtree ever hands up
//! more than K records.

#![allow(missing_docs)]

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::scanner::model::LargeFileEntry;

/// Heap key: orders by size, then by path so equal sizes stay deterministic.
#[derive(Debug, Clone)]
struct BySize(LargeFileEntry);

impl PartialEq for BySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BySize {}

impl PartialOrd for BySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .cmp_size(&other.0)
            // Smaller path ranks "larger" so it survives eviction first.
            .then_with(|| other.0.path.cmp(&self.0.path))
    }
}

#[derive(Debug, Clone)]
pub struct TopKTracker {
    capacity: usize,
    heap: BinaryHeap<Reverse<BySize>>,
}

impl TopKTracker {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Size of the smallest retained record, if the tracker is non-empty.
    #[must_use]
    pub fn min_size(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(BySize(entry))| entry.size)
    }

    /// Offer a candidate. Returns `true` if it was retained.
    pub fn insert(&mut self, entry: LargeFileEntry) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let candidate = BySize(entry);
        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(candidate));
            return true;
        }
        match self.heap.peek() {
            Some(Reverse(min)) if candidate > *min => {
                self.heap.pop();
                self.heap.push(Reverse(candidate));
                true
            }
            _ => false,
        }
    }

    /// Fold another tracker's records into this one.
    pub fn merge(&mut self, other: Self) {
        for Reverse(BySize(entry)) in other.heap {
            self.insert(entry);
        }
    }

    /// Retained records, largest first.
    #[must_use]
    pub fn elements(&self) -> Vec<LargeFileEntry> {
        let mut out: Vec<LargeFileEntry> = self
            .heap
            .iter()
            .map(|Reverse(BySize(entry))| entry.clone())
            .collect();
        sort_desc(&mut out);
        out
    }

    /// Consume the tracker, returning records largest first.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<LargeFileEntry> {
        // Ascending order of Reverse<_> is descending order of the record.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(BySize(entry))| entry)
            .collect()
    }
}

fn sort_desc(entries: &mut [LargeFileEntry]) {
    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn record(name: &str, size: u64) -> LargeFileEntry {
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        LargeFileEntry::new(&PathBuf::from("/data").join(name), size, epoch)
    }

    fn sizes(entries: &[LargeFileEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.size).collect()
    }

    #[test]
    fn keeps_largest_k() {
        let mut tracker = TopKTracker::new(3);
        for (i, size) in [5_u64, 90, 10, 70, 1, 60, 80].into_iter().enumerate() {
            tracker.insert(record(&format!("f{i}"), size));
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(sizes(&tracker.elements()), vec![90, 80, 70]);
        assert_eq!(tracker.min_size(), Some(70));
    }

    #[test]
    fn rejects_candidate_not_above_minimum() {
        let mut tracker = TopKTracker::new(2);
        assert!(tracker.insert(record("a", 100)));
        assert!(tracker.insert(record("b", 50)));
        assert!(!tracker.insert(record("c", 10)));
        assert!(tracker.insert(record("d", 60)));
        assert_eq!(sizes(&tracker.elements()), vec![100, 60]);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut tracker = TopKTracker::new(0);
        assert!(!tracker.insert(record("a", 1)));
        assert!(tracker.is_empty());
        assert_eq!(tracker.min_size(), None);
    }

    #[test]
    fn merge_keeps_global_top_k() {
        let mut left = TopKTracker::new(2);
        left.insert(record("l1", 10));
        left.insert(record("l2", 40));
        let mut right = TopKTracker::new(2);
        right.insert(record("r1", 30));
        right.insert(record("r2", 50));

        left.merge(right);
        assert_eq!(sizes(&left.into_sorted_vec()), vec![50, 40]);
    }

    proptest! {
        #[test]
        fn retained_set_is_the_true_top_k(
            all_sizes in prop::collection::vec(0_u64..1_000_000, 0..200),
            k in 0_usize..20,
        ) {
            let mut tracker = TopKTracker::new(k);
            for (i, size) in all_sizes.iter().enumerate() {
                tracker.insert(record(&format!("f{i:04}"), *size));
            }

            let kept = tracker.elements();
            prop_assert!(kept.len() <= k);
            prop_assert_eq!(kept.len(), k.min(all_sizes.len()));
            prop_assert!(kept.windows(2).all(|w| w[0].size >= w[1].size));

            let mut expected = all_sizes.clone();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            expected.truncate(k);
            prop_assert_eq!(sizes(&kept), expected);
        }

        #[test]
        fn merging_partitions_matches_single_tracker(
            all_sizes in prop::collection::vec(0_u64..10_000, 0..120),
            split in 0_usize..120,
            k in 1_usize..15,
        ) {
            let split = split.min(all_sizes.len());
            let mut single = TopKTracker::new(k);
            let mut left = TopKTracker::new(k);
            let mut right = TopKTracker::new(k);
            for (i, size) in all_sizes.iter().enumerate() {
                let entry = record(&format!("f{i:04}"), *size);
                single.insert(entry.clone());
                if i < split {
                    left.insert(entry);
                } else {
                    right.insert(entry);
                }
            }
            left.merge(right);
            prop_assert_eq!(sizes(&left.elements()), sizes(&single.elements()));
        }
    }
}
