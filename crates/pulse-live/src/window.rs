//! Bounded, newest-first window of recent raw events.
//!
//! The window is a presentation cache. It owns no durable state and can be
//! rebuilt from storage at any time with [`EventWindow::initialize`].
//!
//! Order is arrival order at this process, not event time: two producers
//! racing can land in either order and the window keeps whatever order the
//! feed delivered.

use std::collections::VecDeque;

use pulse_core::Event;

/// Capacity-limited buffer of the most recently arrived events.
#[derive(Debug, Clone)]
pub struct EventWindow {
    capacity: usize,
    events: VecDeque<Event>,
}

impl EventWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    /// Replace the contents with `batch`, which must already be newest-first.
    /// Anything past capacity is dropped.
    pub fn initialize(&mut self, batch: Vec<Event>) {
        self.events.clear();
        self.events.extend(batch.into_iter().take(self.capacity));
    }

    /// Prepend a live arrival, evicting from the tail past capacity.
    ///
    /// An event whose id is already in the window is ignored and `false` is
    /// returned. This happens when an insert lands between subscribing and
    /// the initial load, so it is seen by both.
    pub fn on_live_insert(&mut self, event: Event) -> bool {
        if self.events.iter().any(|e| e.id == event.id) {
            return false;
        }
        self.events.push_front(event);
        while self.events.len() > self.capacity {
            self.events.pop_back();
        }
        true
    }

    /// Newest-first copy of the contents.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently arrived event.
    pub fn newest(&self) -> Option<&Event> {
        self.events.front()
    }

    /// Fixed-width occupancy bars: bucket `i` is set iff the window holds at
    /// least `i + 1` events.
    pub fn histogram(&self, width: usize) -> Vec<bool> {
        (0..width).map(|i| self.events.len() > i).collect()
    }
}
