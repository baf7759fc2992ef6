//! FIFO hand-off of alert events to the presentation consumer.
//!
//! Producers never block. When the queue is full the oldest pending event is
//! evicted so a stalled consumer cannot grow memory without bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use super::alert::AlertEvent;

/// Bounded FIFO with drop-oldest overflow.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<AlertEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append at the tail. Returns the evicted head if the queue was full.
    pub fn push(&self, event: AlertEvent) -> Option<AlertEvent> {
        let mut events = self.events.lock();
        let evicted = if events.len() >= self.capacity {
            events.pop_front()
        } else {
            None
        };
        events.push_back(event);
        drop(events);

        if let Some(old) = &evicted {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                mac = %old.mac_address,
                dropped_total = total,
                "event queue full, dropped oldest alert"
            );
        }
        evicted
    }

    /// Remove and return the head, or `None` when nothing is pending.
    pub fn pop_oldest(&self) -> Option<AlertEvent> {
        self.events.lock().pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events evicted by overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
