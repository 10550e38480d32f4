//! Wakers bridging `std::task` futures onto the event loop.
//!
//! Two kinds exist:
//! - [`TaskWaker`] queues the id of a spawned task; the loop turns queued ids into
//!   polling microtasks.
//! - [`Signal`] is the waker of the future driven by `Runtime::block_on`; it only
//!   records that the future asked to be polled again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Wake, Waker};

/// Ids of spawned tasks woken since the loop last looked.
///
/// `Waker` must be `Send + Sync`, so this is the one place where the single-threaded
/// runtime uses a lock.
pub(crate) type WakeQueue = Arc<Mutex<VecDeque<usize>>>;

/// Waker of a spawned task.
pub(crate) struct TaskWaker {
    id: usize,
    queue: WakeQueue,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(self.id);
        }
    }
}

/// Creates a Waker that queues `id` on `queue` when woken.
///
/// # Arguments
/// * `id` - The slot of the task to wake
/// * `queue` - The wake queue drained by the event loop
pub(crate) fn make_waker(id: usize, queue: WakeQueue) -> Waker {
    Waker::from(Arc::new(TaskWaker { id, queue }))
}

/// Wake flag of the future driven by `block_on`.
#[derive(Default)]
pub(crate) struct Signal {
    notified: AtomicBool,
}

impl Signal {
    /// Returns whether the future was woken, clearing the flag.
    pub(crate) fn take(&self) -> bool {
        self.notified.swap(false, Ordering::AcqRel)
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
    }
}
