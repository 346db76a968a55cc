//! Thread-safe priority queue with FIFO tie-breaking per tier.
//!
//! Holds draw keys only; item state lives in the engine's shared map.
//! Cancelled items are removed lazily — the worker discards keys whose
//! item is no longer pending.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use crate::model::{Priority, WorkItemId};

/// Draw key for one queued item. Ordered by priority tier first, then by
/// enqueue sequence (FIFO within a tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    pub priority: Priority,
    pub sequence: u64,
    pub id: WorkItemId,
}

/// Min-queue over `QueueKey`. Safe for concurrent push from many
/// producers and pop from the single worker.
pub struct OrderedQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueKey>>>,
}

impl OrderedQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    /// Insert a key. O(log n).
    pub fn push(&self, key: QueueKey) {
        self.heap.lock().expect("queue lock poisoned").push(Reverse(key));
    }

    /// Remove and return the smallest `(priority, sequence)` key, or
    /// `None` if nothing is ready. Never blocks.
    pub fn pop_min(&self) -> Option<QueueKey> {
        self.heap
            .lock()
            .expect("queue lock poisoned")
            .pop()
            .map(|Reverse(key)| key)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OrderedQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: Priority, sequence: u64) -> QueueKey {
        QueueKey {
            priority,
            sequence,
            id: WorkItemId::new(),
        }
    }

    #[test]
    fn pops_lowest_priority_value_first() {
        let q = OrderedQueue::new();
        q.push(key(Priority::Low, 0));
        q.push(key(Priority::High, 1));
        q.push(key(Priority::Normal, 2));

        assert_eq!(q.pop_min().unwrap().priority, Priority::High);
        assert_eq!(q.pop_min().unwrap().priority, Priority::Normal);
        assert_eq!(q.pop_min().unwrap().priority, Priority::Low);
        assert!(q.pop_min().is_none());
    }

    #[test]
    fn fifo_within_a_tier() {
        let q = OrderedQueue::new();
        for seq in [5u64, 1, 3, 2, 4] {
            q.push(key(Priority::Normal, seq));
        }

        let drawn: Vec<u64> = std::iter::from_fn(|| q.pop_min())
            .map(|k| k.sequence)
            .collect();
        assert_eq!(drawn, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn interleaved_tiers_preserve_sequence_order() {
        let q = OrderedQueue::new();
        q.push(key(Priority::Normal, 1));
        q.push(key(Priority::High, 2));
        q.push(key(Priority::Low, 3));
        q.push(key(Priority::High, 4));
        q.push(key(Priority::Normal, 5));

        let drawn: Vec<(Priority, u64)> = std::iter::from_fn(|| q.pop_min())
            .map(|k| (k.priority, k.sequence))
            .collect();
        assert_eq!(
            drawn,
            vec![
                (Priority::High, 2),
                (Priority::High, 4),
                (Priority::Normal, 1),
                (Priority::Normal, 5),
                (Priority::Low, 3),
            ]
        );
    }

    #[test]
    fn concurrent_push_keeps_all_keys() {
        use std::sync::Arc;

        let q = Arc::new(OrderedQueue::new());
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let q = Arc::clone(&q);
            handles.push(std::thread::spawn(move || {
                for i in 0..100u64 {
                    q.push(key(Priority::Normal, t * 100 + i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(q.len(), 400);
        let mut last = 0;
        while let Some(k) = q.pop_min() {
            assert!(k.sequence >= last);
            last = k.sequence;
        }
    }
}
