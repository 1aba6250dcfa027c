//! Eviction priority queue.
//!
//! A min-heap over rate keys snapshotted from pool entries. The comparator
//! reads each entry at one of two faces: the direct rate
//! (`delta_fee / size`) or the descendant package rate
//! (`desc_fee / desc_size`), taking the package face when it outbids the
//! direct one (`desc_fee * size > delta_fee * desc_size`) so a cheap
//! parent carrying well-paying children is not evicted from under them.
//! Ties fall to the older entry so stale low-rate transactions drain
//! first.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use ember_core::types::Hash256;

use crate::entry::MempoolEntry;

/// Snapshot of the fields the eviction comparator needs.
#[derive(Debug, Clone)]
pub(crate) struct RateKey {
    pub delta_fee: i64,
    pub size: u64,
    pub desc_fee: u64,
    pub desc_size: u64,
    pub time: u64,
    pub hash: Hash256,
}

impl RateKey {
    pub fn from_entry(entry: &MempoolEntry) -> Self {
        Self {
            delta_fee: entry.delta_fee,
            size: entry.size,
            desc_fee: entry.desc_fee,
            desc_size: entry.desc_size,
            time: entry.time,
            hash: entry.hash,
        }
    }

    /// The (fee, size) face used for comparison.
    fn rate_parts(&self) -> (u128, u128) {
        let delta = self.delta_fee.max(0) as u128;
        let use_desc = self.desc_fee as u128 * self.size as u128 > delta * self.desc_size as u128;
        if use_desc {
            (self.desc_fee as u128, self.desc_size.max(1) as u128)
        } else {
            (delta, self.size.max(1) as u128)
        }
    }
}

impl Ord for RateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (self_fee, self_size) = self.rate_parts();
        let (other_fee, other_size) = other.rate_parts();
        // Cross-multiplied rate compare, then age, then hash for totality.
        (self_fee * other_size)
            .cmp(&(other_fee * self_size))
            .then_with(|| self.time.cmp(&other.time))
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for RateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RateKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RateKey {}

/// Min-heap of entries keyed by effective rate; `pop` yields the cheapest
/// package first.
#[derive(Default)]
pub(crate) struct FeeHeap {
    heap: BinaryHeap<Reverse<RateKey>>,
}

impl FeeHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: &MempoolEntry) {
        self.heap.push(Reverse(RateKey::from_entry(entry)));
    }

    pub fn pop(&mut self) -> Option<RateKey> {
        self.heap.pop().map(|Reverse(key)| key)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(delta_fee: i64, size: u64, desc_fee: u64, desc_size: u64, time: u64, seed: u8) -> RateKey {
        RateKey {
            delta_fee,
            size,
            desc_fee,
            desc_size,
            time,
            hash: Hash256([seed; 32]),
        }
    }

    fn heap_of(keys: Vec<RateKey>) -> FeeHeap {
        let mut heap = FeeHeap::new();
        for k in keys {
            heap.heap.push(Reverse(k));
        }
        heap
    }

    #[test]
    fn pops_lowest_direct_rate_first() {
        let mut heap = heap_of(vec![
            key(3000, 100, 3000, 100, 0, 1), // 30/kB
            key(1000, 100, 1000, 100, 0, 2), // 10/kB
            key(2000, 100, 2000, 100, 0, 3), // 20/kB
        ]);
        assert_eq!(heap.pop().unwrap().hash, Hash256([2; 32]));
        assert_eq!(heap.pop().unwrap().hash, Hash256([3; 32]));
        assert_eq!(heap.pop().unwrap().hash, Hash256([1; 32]));
        assert!(heap.is_empty());
    }

    #[test]
    fn package_rate_rescues_cheap_parent() {
        // Parent pays 1/kB directly but its descendants lift the package
        // to 50/kB, so the 20/kB loner is evicted first.
        let mut heap = heap_of(vec![
            key(100, 100, 5000, 100, 0, 1),  // package face: 50/kB
            key(2000, 100, 2000, 100, 0, 2), // 20/kB
        ]);
        assert_eq!(heap.pop().unwrap().hash, Hash256([2; 32]));
        assert_eq!(heap.pop().unwrap().hash, Hash256([1; 32]));
    }

    #[test]
    fn package_face_only_when_it_outbids() {
        // desc rate lower than direct: direct face wins.
        let k = key(2000, 100, 2100, 200, 0, 1); // direct 20/kB, package 10.5/kB
        assert_eq!(k.rate_parts(), (2000, 100));

        let k = key(100, 100, 5000, 100, 0, 1);
        assert_eq!(k.rate_parts(), (5000, 100));
    }

    #[test]
    fn ties_broken_by_age() {
        let mut heap = heap_of(vec![
            key(1000, 100, 1000, 100, 50, 1),
            key(1000, 100, 1000, 100, 10, 2), // older
        ]);
        assert_eq!(heap.pop().unwrap().hash, Hash256([2; 32]));
    }

    #[test]
    fn negative_delta_fee_treated_as_zero() {
        let mut heap = heap_of(vec![
            key(-500, 100, 0, 100, 0, 1),
            key(10, 100, 10, 100, 0, 2),
        ]);
        assert_eq!(heap.pop().unwrap().hash, Hash256([1; 32]));
    }
}
