//! Bucketed FIFO priority queue for waiting requests

use std::cell::Cell;
use std::collections::VecDeque;

/// Fixed number of FIFO buckets; bucket 0 is always served first.
///
/// Lower priority buckets are only touched once every bucket before them is
/// empty, so a steady stream of urgent items starves the rest.
///
/// # Examples
///
/// ```
/// use esox_resourcepool::PriorityQueue;
///
/// let mut queue = PriorityQueue::new(3);
/// queue.enqueue("low", 2);
/// queue.enqueue("high", 0);
/// queue.enqueue("clamped", 99);
///
/// assert_eq!(queue.len(), 3);
/// assert_eq!(queue.dequeue(), Some("high"));
/// assert_eq!(queue.dequeue(), Some("low"));
/// assert_eq!(queue.dequeue(), Some("clamped"));
/// assert_eq!(queue.dequeue(), None);
/// ```
#[derive(Debug)]
pub struct PriorityQueue<T> {
    slots: Vec<VecDeque<T>>,
    total: Cell<Option<usize>>,
}

impl<T> PriorityQueue<T> {
    /// Create a queue with `size` priority levels (at least one)
    pub fn new(size: usize) -> Self {
        let slots = (0..size.max(1)).map(|_| VecDeque::new()).collect();
        Self {
            slots,
            total: Cell::new(Some(0)),
        }
    }

    /// Number of priority levels
    pub fn priority_range(&self) -> usize {
        self.slots.len()
    }

    /// Clamp a requested priority into the valid bucket range
    pub fn clamp_priority(&self, priority: usize) -> usize {
        priority.min(self.slots.len() - 1)
    }

    /// Append `item` to the tail of its bucket, returning the bucket used
    pub fn enqueue(&mut self, item: T, priority: usize) -> usize {
        let priority = self.clamp_priority(priority);
        self.total.set(None);
        self.slots[priority].push_back(item);
        priority
    }

    /// Remove the head of the first non-empty bucket
    pub fn dequeue(&mut self) -> Option<T> {
        self.total.set(None);
        self.slots.iter_mut().find_map(|slot| slot.pop_front())
    }

    /// Keep only the items matching `keep`, preserving order
    pub fn retain<P>(&mut self, mut keep: P)
    where
        P: FnMut(&T) -> bool,
    {
        self.total.set(None);
        for slot in &mut self.slots {
            slot.retain(|item| keep(item));
        }
    }

    /// Total queued items across all buckets
    pub fn len(&self) -> usize {
        match self.total.get() {
            Some(total) => total,
            None => {
                let total = self.slots.iter().map(VecDeque::len).sum();
                self.total.set(Some(total));
                total
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
