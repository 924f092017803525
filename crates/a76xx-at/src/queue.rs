//! Fixed-capacity FIFO queues for asynchronous payloads.
//!
//! URC handlers cannot return anything to the wait that triggered them, so
//! whatever they decode lands in one of these queues and is drained later by
//! the owning client.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// What to do when pushing into a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the queue as is and lose the new element.
    DropNewest,
    /// Evict the oldest element to make room for the new one.
    #[default]
    DropOldest,
}

/// A FIFO holding at most `capacity` elements.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    /// Elements lost to the overflow policy since creation.
    dropped: u64,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        BoundedQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
            dropped: 0,
        }
    }

    /// Append an element.
    ///
    /// Returns `false` if the element itself was dropped. Under
    /// [`OverflowPolicy::DropOldest`] the new element is always stored and the
    /// oldest one is discarded instead.
    pub fn push(&mut self, item: T) -> bool {
        if self.items.len() < self.capacity {
            self.items.push_back(item);
            return true;
        }
        self.dropped += 1;
        match self.policy {
            OverflowPolicy::DropNewest => false,
            OverflowPolicy::DropOldest => {
                if self.items.pop_front().is_none() {
                    // Zero capacity: nothing to evict, nowhere to store.
                    return false;
                }
                self.items.push_back(item);
                true
            }
        }
    }

    /// Remove and return the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Peek at the oldest element.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of elements lost to the overflow policy.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Remove all elements.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// A queue shared between a URC handler and the client that drains it.
pub type SharedQueue<T> = Arc<Mutex<BoundedQueue<T>>>;

/// Create a [`SharedQueue`].
pub fn shared_queue<T>(capacity: usize, policy: OverflowPolicy) -> SharedQueue<T> {
    Arc::new(Mutex::new(BoundedQueue::new(capacity, policy)))
}
