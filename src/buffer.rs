// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug)]
struct Slots<T> {
    items: VecDeque<T>,
    /// Level signal, set when the buffer reaches capacity and cleared once it drops below.
    filled: bool,
    dropped: u64,
}

/// A fixed-capacity FIFO shared between the acquisition worker and the presentation pump.
///
/// When full, [`put`][BoundedFrameBuffer::put] evicts the oldest item instead of blocking or
/// rejecting the new one. For a live feed a late frame is worse than a missing one. Every
/// operation takes the same lock, so the size and overflow decisions are always made against a
/// consistent snapshot. The lock is never held across an `.await`.
#[derive(Debug)]
pub(crate) struct BoundedFrameBuffer<T> {
    capacity: usize,
    slots: Mutex<Slots<T>>,
    filled_signal: Condvar,
}

impl<T> BoundedFrameBuffer<T> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            capacity,
            slots: Mutex::new(Slots {
                items: VecDeque::with_capacity(capacity),
                filled: false,
                dropped: 0,
            }),
            filled_signal: Condvar::new(),
        }
    }

    /// Add an item, evicting the oldest one if the buffer is already at capacity.
    ///
    /// This always succeeds, the return value is only there so callers can treat it like other
    /// queue-ish containers.
    pub(crate) fn put(&self, item: T) -> bool {
        let mut slots = self.slots.lock();
        if slots.items.len() == self.capacity {
            slots.items.pop_front();
            slots.dropped += 1;
            trace!(dropped = slots.dropped, "buffer full, evicted oldest frame");
        }
        slots.items.push_back(item);
        if !slots.filled && slots.items.len() == self.capacity {
            slots.filled = true;
            self.filled_signal.notify_all();
        }
        true
    }

    /// Remove the oldest item. `None` means there is nothing new, which is the normal state of
    /// affairs for a consumer polling faster than the producer.
    pub(crate) fn get(&self) -> Option<T> {
        let mut slots = self.slots.lock();
        let item = slots.items.pop_front();
        if slots.items.len() < self.capacity {
            slots.filled = false;
        }
        item
    }

    /// Remove and return every item, oldest first.
    pub(crate) fn get_all(&self) -> Vec<T> {
        let mut slots = self.slots.lock();
        slots.filled = false;
        slots.items.drain(..).collect()
    }

    pub(crate) fn full(&self) -> bool {
        self.slots.lock().items.len() == self.capacity
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn empty(&self) -> bool {
        self.slots.lock().items.is_empty()
    }

    pub(crate) fn size(&self) -> usize {
        self.slots.lock().items.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// The total number of items evicted to make room for newer ones.
    pub(crate) fn dropped(&self) -> u64 {
        self.slots.lock().dropped
    }

    pub(crate) fn is_filled(&self) -> bool {
        self.slots.lock().filled
    }

    /// Wait up to `timeout` for the buffer to reach capacity, returning the fill signal.
    ///
    /// This is for observing startup and backpressure, not for handing off individual frames.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn wait_until_filled(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        while !slots.filled {
            if self
                .filled_signal
                .wait_until(&mut slots, deadline)
                .timed_out()
            {
                break;
            }
        }
        slots.filled
    }
}

impl<T: Clone> BoundedFrameBuffer<T> {
    /// A snapshot of the buffered items, oldest first, leaving the buffer untouched.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn peek_all(&self) -> Vec<T> {
        self.slots.lock().items.iter().cloned().collect()
    }
}
