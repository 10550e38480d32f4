//! Spawned tasks: Rust futures driven by the event loop.
//!
//! [`spawn`] bridges `async` code into the deferred world. The future is polled on a
//! microtask inside the zone that was current at spawn time, and its result settles the
//! returned [`Deferred`]. Inside the future, any `Deferred` can be `.await`ed.
//!
//! ```ignore
//! use ripple::{spawn, time::sleep, AsyncError};
//! use std::time::Duration;
//!
//! let answer = spawn(async {
//!     sleep(Duration::from_millis(10)).await.map_err(|f| f.error)?;
//!     Ok::<_, AsyncError>(42)
//! });
//! ```
//!
//! # How Tasks Work
//!
//! 1. The future is boxed into a slot of a thread-local [`Slab`]; the slot index is the task id
//! 2. A microtask polls it with a waker carrying that id
//! 3. When the future returns `Poll::Pending`, it is put back into its slot
//! 4. Waking pushes the id onto a wake queue; the loop turns each woken id into a new
//!    polling microtask
//! 5. On completion the slot is freed and the deferred settles

use crate::deferred::{Completer, Deferred};
use crate::error::AsyncError;
use crate::runtime::context;
use crate::runtime::waker::{WakeQueue, make_waker};
use crate::utils::Slab;
use crate::zone::Zone;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::trace;

type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

struct TaskSlot {
    future: Option<BoxedTask>,
    zone: Zone,
    scheduled: bool,
}

thread_local! {
    static TASKS: RefCell<Slab<TaskSlot>> = RefCell::new(Slab::new());
    static WAKES: WakeQueue = WakeQueue::default();
}

/// Runs `future` on the event loop and returns a deferred settled with its result.
///
/// The future is first polled on a microtask, inside the zone current at the call.
/// An `Err` result settles the deferred with that error.
///
/// # Arguments
/// * `future` - The computation to run
///
/// # Returns
/// A `Deferred` that settles when the future completes
pub fn spawn<T, F>(future: F) -> Deferred<T>
where
    T: Clone + 'static,
    F: Future<Output = Result<T, AsyncError>> + 'static,
{
    let completer = Completer::sync();
    let deferred = completer.deferred();

    let body = async move {
        let settled = match future.await {
            Ok(value) => completer.complete(value),
            Err(error) => completer.complete_error(error, None),
        };
        if let Err(misuse) = settled {
            trace!(%misuse, "spawned task settled twice");
        }
    };

    let zone = Zone::current();
    let id = TASKS.with(|tasks| {
        tasks.borrow_mut().insert(TaskSlot {
            future: Some(Box::pin(body)),
            zone,
            scheduled: true,
        })
    });

    trace!(id, "task spawned");
    context::enqueue_microtask(Box::new(move || poll_task(id)));

    deferred
}

fn poll_task(id: usize) {
    let taken = TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        let slot = tasks.get_mut(id)?;
        slot.scheduled = false;
        Some((slot.future.take()?, slot.zone.clone()))
    });

    let Some((mut future, zone)) = taken else {
        return;
    };

    let waker = WAKES.with(|wakes| make_waker(id, wakes.clone()));
    let mut cx = Context::from_waker(&waker);
    let poll = zone.run(|| future.as_mut().poll(&mut cx));

    TASKS.with(|tasks| {
        let mut tasks = tasks.borrow_mut();
        match poll {
            Poll::Ready(()) => {
                tasks.remove(id);
                trace!(id, remaining = tasks.len(), "task completed");
            }
            Poll::Pending => {
                if let Some(slot) = tasks.get_mut(id) {
                    slot.future = Some(future);
                }
            }
        }
    });
}

/// Turns every woken task id into a polling microtask.
///
/// Returns true if at least one task was scheduled.
pub(crate) fn schedule_woken() -> bool {
    let woken: VecDeque<usize> = WAKES.with(|wakes| match wakes.lock() {
        Ok(mut queue) => std::mem::take(&mut *queue),
        Err(_) => VecDeque::new(),
    });

    let mut scheduled = false;
    for id in woken {
        let fresh = TASKS.with(|tasks| match tasks.borrow_mut().get_mut(id) {
            Some(slot) if !slot.scheduled => {
                slot.scheduled = true;
                true
            }
            _ => false,
        });

        if fresh {
            context::enqueue_microtask(Box::new(move || poll_task(id)));
            scheduled = true;
        }
    }

    scheduled
}

/// Number of spawned tasks that have not completed yet.
pub(crate) fn live_tasks() -> usize {
    TASKS.with(|tasks| tasks.borrow().len())
}
