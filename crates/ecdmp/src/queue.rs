//! Bounded event queue.

use crate::types::Event;
use tracing::debug;

/// Ordered buffer of pending events, oldest first.
///
/// Not synchronized on its own; the tracker keeps it behind its gate.
#[derive(Debug)]
pub struct EventQueue {
    events: Vec<Event>,
    max_len: usize,
}

impl EventQueue {
    /// Create an empty queue holding at most `max_len` events.
    pub fn new(max_len: usize) -> Self {
        Self {
            events: Vec::new(),
            max_len,
        }
    }

    /// Replace the contents with previously persisted events.
    ///
    /// Keeps only the newest `max_len` events if the stored blob is larger.
    pub fn restore(&mut self, mut events: Vec<Event>) {
        if events.len() > self.max_len {
            let excess = events.len() - self.max_len;
            events.drain(..excess);
        }
        self.events = events;
    }

    /// Append an event, evicting the oldest one if the queue is over capacity.
    ///
    /// Returns the evicted event, if any.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        self.events.push(event);
        if self.events.len() > self.max_len {
            debug!(max_len = self.max_len, "event queue full, dropping oldest event");
            return Some(self.events.remove(0));
        }
        None
    }

    /// Get the number of events in the queue.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Pending events, oldest first.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Remove all events.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}
