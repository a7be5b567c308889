//! Bounded recent-readings buffer
//!
//! Consumers poll the last few readings; the buffer keeps at most N entries
//! and evicts the oldest first.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::constants::recent::DEFAULT_CAPACITY;

/// Fixed-capacity FIFO buffer
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedBuffer<T> {
    /// Capacity is at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append, evicting the oldest entry when full. Returns the evicted entry.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Copy of the contents, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// One entry of the consumer read-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentReading {
    pub timestamp: String,
    #[serde(rename = "data")]
    pub value: f64,
}

/// The read-out served to consumers
pub type RecentReadings = BoundedBuffer<RecentReading>;

impl Default for RecentReadings {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
