//! In-memory priority queue with FIFO ordering inside a priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::util::serde::Priority;

/// Heap entry ordered by priority (highest first), then by sequence (lowest first).
struct PriorityEntry<T> {
    rank: u8,
    seq: u64,
    item: T,
}

impl<T> PartialEq for PriorityEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl<T> Eq for PriorityEntry<T> {}

impl<T> PartialOrd for PriorityEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PriorityEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first; FIFO within a priority (reversed for max-heap).
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority heap with O(log n) push and pop.
///
/// Ties are broken by a monotonically increasing sequence number, so two
/// items of equal priority always leave in insertion order.
pub struct InMemoryQueue<T> {
    heap: BinaryHeap<PriorityEntry<T>>,
    next_seq: u64,
}

impl<T> InMemoryQueue<T> {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Empty queue with room for `capacity` items before reallocating.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
            next_seq: 0,
        }
    }

    /// Insert `item` at `priority`.
    pub fn push(&mut self, item: T, priority: Priority) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PriorityEntry {
            rank: priority.rank(),
            seq,
            item,
        });
    }

    /// Remove the highest-priority, oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// Remove every item matching `pred`, returning them.
    pub fn prune<F>(&mut self, mut pred: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let (pruned, kept): (Vec<_>, Vec<_>) =
            self.heap.drain().partition(|entry| pred(&entry.item));
        self.heap = kept.into_iter().collect();
        pruned.into_iter().map(|entry| entry.item).collect()
    }

    /// Remove all items in unspecified order.
    pub fn drain(&mut self) -> Vec<T> {
        self.heap.drain().map(|entry| entry.item).collect()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        let mut q = InMemoryQueue::new();

        q.push(1, Priority::Low);
        q.push(2, Priority::Critical);
        q.push(3, Priority::Normal);
        q.push(4, Priority::High);

        assert_eq!(q.pop(), Some(2)); // Critical
        assert_eq!(q.pop(), Some(4)); // High
        assert_eq!(q.pop(), Some(3)); // Normal
        assert_eq!(q.pop(), Some(1)); // Low
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = InMemoryQueue::new();
        for id in 0..50 {
            q.push(id, Priority::Normal);
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_prune_keeps_order_of_survivors() {
        let mut q = InMemoryQueue::new();
        q.push(1, Priority::Normal);
        q.push(2, Priority::High);
        q.push(3, Priority::Normal);
        q.push(4, Priority::Critical);

        let mut pruned = q.prune(|id| id % 2 == 0);
        pruned.sort_unstable();
        assert_eq!(pruned, vec![2, 4]);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn test_empty_queue() {
        let mut q = InMemoryQueue::<String>::default();
        assert!(q.pop().is_none());
        assert!(q.is_empty());
        assert!(q.drain().is_empty());
    }
}
