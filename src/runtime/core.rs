//! The event loop that drives microtasks, timers and spawned tasks.
//!
//! One turn of the loop does exactly one thing, in this priority order:
//! 1. turn woken tasks into polling microtasks,
//! 2. run the oldest microtask,
//! 3. fire the earliest expired timer,
//! 4. sleep until the next timer deadline.
//!
//! Because microtasks always win over timers, every microtask queued by a timer callback
//! runs before the next timer fires.

use crate::deferred::Deferred;
use crate::error::AsyncError;
use crate::runtime::context::{self, RuntimeConfig, enter_context};
use crate::runtime::waker::Signal;
use crate::task;
use crate::timer;

use std::future::{Future, IntoFuture};
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;

use tracing::debug;

/// Handle to the event loop of the current thread.
///
/// The loop state itself is thread-local, so deferreds, streams and timers can be
/// created before the runtime exists; the runtime only drives them.
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    ///
    /// # Example
    /// ```ignore
    /// let mut rt = Runtime::new();
    /// rt.run();
    /// ```
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    /// Spawns a future on the loop. See [`spawn`](crate::spawn).
    pub fn spawn<T, F>(&self, future: F) -> Deferred<T>
    where
        T: Clone + 'static,
        F: Future<Output = Result<T, AsyncError>> + 'static,
    {
        task::spawn(future)
    }

    /// Runs the loop until no microtask, timer or woken task is left.
    pub fn run(&mut self) {
        let config = self.config;
        enter_context(config, || while turn(&config) {});

        debug!(live_tasks = task::live_tasks(), "event loop idle");
    }

    /// Drives `future` to completion, running the loop while it is pending.
    ///
    /// Microtasks queued by the time the future completes are drained before returning;
    /// timers that are still armed stay armed for the next `run`.
    ///
    /// # Panics
    /// Panics if the loop runs out of work while the future is still pending, since
    /// nothing could ever wake it.
    ///
    /// # Example
    /// ```ignore
    /// let mut rt = Runtime::new();
    /// let value = rt.block_on(Deferred::value(42));
    /// assert_eq!(value.unwrap(), 42);
    /// ```
    pub fn block_on<F: IntoFuture>(&mut self, future: F) -> F::Output {
        let config = self.config;

        enter_context(config, || {
            let mut future = pin!(future.into_future());
            let signal = Arc::new(Signal::default());
            let waker = Waker::from(signal.clone());
            let mut cx = Context::from_waker(&waker);

            loop {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    drain_microtasks();
                    return output;
                }

                while !signal.take() {
                    if !turn(&config) {
                        panic!("Runtime::block_on: the event loop is idle but the future is still pending");
                    }
                }
            }
        })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// Performs one unit of work. Returns false when the loop is idle.
fn turn(config: &RuntimeConfig) -> bool {
    task::schedule_woken();

    if let Some(microtask) = context::next_microtask() {
        microtask();
        return true;
    }

    if let Some(expired) = timer::pop_expired_timer() {
        expired.fire();
        return true;
    }

    match timer::next_timer_remaining() {
        Some(remaining) => {
            if !remaining.is_zero() {
                thread::sleep(remaining.min(config.max_idle_sleep));
            }
            true
        }
        None => false,
    }
}

fn drain_microtasks() {
    loop {
        task::schedule_woken();
        match context::next_microtask() {
            Some(microtask) => microtask(),
            None => break,
        }
    }
}
