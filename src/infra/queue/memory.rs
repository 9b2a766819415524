//! In-memory priority heap with FIFO ordering inside a priority class.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::util::serde::Priority;

/// Heap entry orderable by `(priority, submitted_at, seq)`, smallest first.
struct PriorityEntry<T> {
    priority: Priority,
    submitted_at: Instant,
    /// Monotonic submission counter; breaks ties between equal `Instant`s.
    seq: u64,
    item: T,
}

impl<T> PartialEq for PriorityEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
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
        // BinaryHeap is a max-heap: reverse so the smallest key is on top.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue yielding the entry with the lowest priority value next,
/// earliest submission first among equals.
pub struct PriorityQueue<T> {
    entries: BinaryHeap<PriorityEntry<T>>,
    next_seq: u64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Create an empty queue with room for `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BinaryHeap::with_capacity(capacity.min(1024)),
            next_seq: 0,
        }
    }

    /// Push an item stamped with the current instant.
    pub fn push(&mut self, priority: Priority, item: T) {
        self.push_at(priority, Instant::now(), item);
    }

    /// Push an item with an explicit submission instant.
    pub fn push_at(&mut self, priority: Priority, submitted_at: Instant, item: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.entries.push(PriorityEntry {
            priority,
            submitted_at,
            seq,
            item,
        });
    }

    /// Remove and return the most urgent item with its priority.
    pub fn pop(&mut self) -> Option<(Priority, T)> {
        self.entries.pop().map(|e| (e.priority, e.item))
    }

    /// Priority of the next item without removing it.
    #[must_use]
    pub fn peek_priority(&self) -> Option<Priority> {
        self.entries.peek().map(|e| e.priority)
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_priority_ordering() {
        let mut q = PriorityQueue::new();

        q.push(Priority(9), "low");
        q.push(Priority(0), "critical");
        q.push(Priority(5), "normal");
        q.push(Priority(1), "high");

        assert_eq!(q.pop().unwrap().1, "critical");
        assert_eq!(q.pop().unwrap().1, "high");
        assert_eq!(q.pop().unwrap().1, "normal");
        assert_eq!(q.pop().unwrap().1, "low");
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = PriorityQueue::new();
        let base = Instant::now();

        q.push_at(Priority(5), base + Duration::from_millis(300), 1);
        q.push_at(Priority(5), base + Duration::from_millis(100), 2);
        q.push_at(Priority(5), base + Duration::from_millis(200), 3);

        assert_eq!(q.pop().unwrap().1, 2);
        assert_eq!(q.pop().unwrap().1, 3);
        assert_eq!(q.pop().unwrap().1, 1);
    }

    #[test]
    fn test_identical_instants_fall_back_to_insertion_order() {
        let mut q = PriorityQueue::new();
        let at = Instant::now();
        for i in 0..50 {
            q.push_at(Priority::NORMAL, at, i);
        }
        let drained: Vec<_> = std::iter::from_fn(|| q.pop().map(|(_, i)| i)).collect();
        assert_eq!(drained, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_queue() {
        let mut q = PriorityQueue::<String>::with_capacity(8);
        assert!(q.pop().is_none());
        assert!(q.is_empty());
        assert_eq!(q.peek_priority(), None);
    }
}
