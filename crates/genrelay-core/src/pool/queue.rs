//! Bounded priority queue for pending tasks
//!
//! Min-first on `(priority, created_at, seq)`: lower priority numbers are
//! more urgent, and a monotonic sequence number keeps submission order
//! stable inside one priority band even when timestamps collide.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::task::TaskItem;

struct QueuedItem {
    seq: u64,
    item: TaskItem,
}

impl QueuedItem {
    fn key(&self) -> (u8, chrono::DateTime<chrono::Utc>, u64) {
        (self.item.priority, self.item.created_at, self.seq)
    }
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

pub(crate) struct PendingQueue {
    heap: BinaryHeap<Reverse<QueuedItem>>,
    capacity: usize,
    next_seq: u64,
}

impl PendingQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            next_seq: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Enqueue an item, or refuse it when the queue is at capacity.
    pub(crate) fn push(&mut self, item: TaskItem) -> bool {
        if self.heap.len() >= self.capacity {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedItem { seq, item }));
        true
    }

    /// Pop the most urgent item (lowest priority number, oldest first).
    pub(crate) fn pop(&mut self) -> Option<TaskItem> {
        self.heap.pop().map(|Reverse(queued)| queued.item)
    }
}
