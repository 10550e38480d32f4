//! FIFO queue of microtasks.
//!
//! A microtask is a boxed callback scheduled to run before the event loop looks at
//! timers again. The queue is owned by the thread-local runtime context.

use std::collections::VecDeque;

/// A callback queued for the next microtask checkpoint.
pub(crate) type Microtask = Box<dyn FnOnce()>;

/// FIFO queue of pending microtasks.
///
/// Microtasks run in the order they were pushed. Nothing here is thread-safe: every
/// event loop thread owns its own queue.
pub(crate) struct MicrotaskQueue {
    queue: VecDeque<Microtask>,
}

impl MicrotaskQueue {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Appends a microtask behind every microtask already queued.
    ///
    /// # Arguments
    /// * `task` - The callback to run
    pub(crate) fn push(&mut self, task: Microtask) {
        self.queue.push_back(task);
    }

    /// Removes and returns the oldest queued microtask.
    ///
    /// # Returns
    /// Some(task) if a microtask is queued, None if the queue is empty
    pub(crate) fn pop(&mut self) -> Option<Microtask> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

impl Default for MicrotaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
