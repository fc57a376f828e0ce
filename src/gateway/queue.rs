// ABOUTME: Bounded FIFO buffers for asynchronously delivered tenant events
// ABOUTME: Oldest-first eviction on overflow; drain hands back everything in arrival order

//! Bounded evicting queues.
//!
//! Each tenant connection owns three of these (feed data, control requests,
//! unsolicited events). The agent client pushes from its own task; the pool
//! manager drains on behalf of callers.
//!
//! ```text
//! capacity 3, push a b c d e
//!
//!   [a]  [a b]  [a b c]  [b c d]  [c d e]   -> drain() == [c, d, e]
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capacity-limited FIFO that evicts its oldest element when full.
#[derive(Debug, Clone)]
pub struct EvictingQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> EvictingQueue<T> {
    /// Create a queue retaining at most `capacity` items (0 disables retention)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            // Avoid allocating huge buffers up front for generous limits
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append an item, evicting the single oldest element if at capacity.
    ///
    /// Returns the evicted element, if any. With a capacity of zero the item
    /// is dropped and returned immediately.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }

        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove and return every queued item in insertion order
    pub fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// === Inbound Events ===

/// Category of an unsolicited event delivered by the agent client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Data shared by a point this tenant follows
    FeedData,
    /// Ask/tell received on a control point this tenant owns
    ControlRequest,
    /// An entity was reassigned to or away from this tenant
    Reassigned,
    /// A subscription was created or removed by a remote party
    Subscription,
}

/// One event record buffered for later collection by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Utc::now(),
        }
    }
}

// === Shared Handle ===

/// Cloneable handle to a tenant event queue.
///
/// The agent client holds one clone per registered hook and pushes into it;
/// the owning connection drains it. The lock is only ever held for a single
/// push or drain.
#[derive(Debug, Clone)]
pub struct EventQueue {
    inner: Arc<Mutex<EvictingQueue<InboundEvent>>>,
}

impl EventQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EvictingQueue::new(capacity))),
        }
    }

    /// Buffer an event; returns true if an older event was evicted to make room
    pub fn push(&self, event: InboundEvent) -> bool {
        let mut queue = self.lock();
        if queue.capacity() == 0 {
            return false;
        }
        queue.push(event).is_some()
    }

    /// Take every buffered event in arrival order
    pub fn drain(&self) -> Vec<InboundEvent> {
        self.lock().drain()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    fn lock(&self) -> MutexGuard<'_, EvictingQueue<InboundEvent>> {
        // Single push/drain per lock; a poisoned deque is still consistent
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
