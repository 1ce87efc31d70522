use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Longest delay a task can be scheduled with
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

struct Entry<T> {
    due: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // reversed so the max-heap yields the earliest deadline, then the oldest entry
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Items that become ready at a given time, owned by one worker. Bounded by `capacity`.
pub struct DelayedTasks<T> {
    heap: BinaryHeap<Entry<T>>,
    capacity: usize,
    next_seq: u64,
}

impl<T> DelayedTasks<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Schedules `item` to become ready after `delay`. Hands the item back if the queue is full.
    pub fn push(&mut self, item: T, delay: Duration) -> Result<(), T> {
        let now = Instant::now();
        let due = now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now);
        self.push_at(item, due)
    }

    pub fn push_at(&mut self, item: T, due: Instant) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.heap.push(Entry { due, seq, item });
        Ok(())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.due)
    }

    /// Removes the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        if self.next_deadline()? > now {
            return None;
        }
        self.heap.pop().map(|entry| entry.item)
    }

    /// Waits for the earliest entry to become due and removes it. Never resolves while empty.
    ///
    /// Cancel safe: the entry is only removed in the poll that completes the future.
    pub async fn next_due(&mut self) -> T {
        loop {
            let Some(due) = self.next_deadline() else {
                return std::future::pending().await;
            };
            sleep_until(due).await;
            if let Some(item) = self.pop_due(Instant::now()) {
                return item;
            }
        }
    }

    /// Removes every pending entry, earliest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            items.push(entry.item);
        }
        items
    }
}
