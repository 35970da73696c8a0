use std::collections::VecDeque;

/// Bounded FIFO of messages waiting for the connection to come back.
///
/// When full, pushing evicts the oldest entry.
#[derive(Debug)]
pub struct Outbox<T> {
    entries: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> Outbox<T> {
    /// Create an outbox holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry. Returns the evicted entry if the outbox was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.dropped += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Take the oldest entry.
    pub fn pop_front(&mut self) -> Option<T> {
        self.entries.pop_front()
    }

    /// Put an entry back at the head after a failed send.
    ///
    /// If the outbox filled up meanwhile, the entry is discarded instead of
    /// evicting something newer.
    pub fn push_front(&mut self, entry: T) -> bool {
        if self.entries.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.entries.push_front(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries discarded because the outbox was full.
    pub fn dropped_total(&self) -> u64 {
        self.dropped
    }
}
