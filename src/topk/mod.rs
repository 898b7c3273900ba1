use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::keys::Key;

/// A key and its sampled memory footprint in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigKey {
    pub key: Key,
    pub size: u64,
}

/// A key and its observed operations per second.
#[derive(Debug, Clone, PartialEq)]
pub struct HotKey {
    pub key: Key,
    pub ops_per_sec: f64,
}

/// Heap slot ordered by metric only.
#[derive(Debug)]
struct Ranked<M, T> {
    metric: M,
    item: T,
}

impl<M: Ord, T> PartialEq for Ranked<M, T> {
    fn eq(&self, other: &Self) -> bool {
        self.metric == other.metric
    }
}

impl<M: Ord, T> Eq for Ranked<M, T> {}

impl<M: Ord, T> PartialOrd for Ranked<M, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M: Ord, T> Ord for Ranked<M, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.metric.cmp(&other.metric)
    }
}

/// Bounded min-heap keeping the `capacity` largest items by metric.
///
/// The root is always the smallest retained metric, so deciding whether a
/// new item displaces it is O(1) and the replacement is O(log K).
#[derive(Debug)]
pub struct TopK<M: Ord, T> {
    capacity: usize,
    heap: BinaryHeap<Reverse<Ranked<M, T>>>,
}

impl<M: Ord, T> TopK<M, T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Offers an item. Returns whether it was retained.
    ///
    /// Once full, an item only displaces the root when its metric is
    /// strictly greater, so the earliest of equally ranked items are kept.
    pub fn offer(&mut self, metric: M, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(Ranked { metric, item }));
            return true;
        }

        let displaces = self
            .heap
            .peek()
            .is_some_and(|Reverse(root)| root.metric < metric);
        if displaces {
            self.heap.pop();
            self.heap.push(Reverse(Ranked { metric, item }));
        }
        displaces
    }

    /// Drains the heap into a list ordered by descending metric.
    pub fn into_sorted_desc(self) -> Vec<(M, T)> {
        // Ascending order of `Reverse` is descending order of the metric.
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(r)| (r.metric, r.item))
            .collect()
    }
}
