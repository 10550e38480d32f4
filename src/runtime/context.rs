//! Thread-local runtime context: configuration and the microtask queue.
//!
//! The event loop is single-threaded, so everything the scheduler needs lives in
//! thread-local storage:
//!
//! - the [`RuntimeConfig`] of the runtime currently driving this thread (set by
//!   [`enter_context`] for the duration of `Runtime::run` / `Runtime::block_on`),
//! - the [`MicrotaskQueue`] behind [`enqueue_microtask`].
//!
//! Outside of a running runtime the default configuration applies, so deferreds and
//! streams can be created and wired up before the loop starts.

use crate::builder::UncaughtErrorPolicy;
use crate::runtime::queue::{Microtask, MicrotaskQueue};

use std::cell::{Cell, RefCell};
use std::time::Duration;

use tracing::trace;

/// Settings of the runtime driving the current thread.
///
/// - `uncaught_errors`: what the root zone does with an unhandled asynchronous error.
/// - `capture_traces`: whether [`StackTrace::capture`](crate::StackTrace::capture) records anything.
/// - `max_idle_sleep`: upper bound for one blocking sleep while waiting for a timer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) uncaught_errors: UncaughtErrorPolicy,
    pub(crate) capture_traces: bool,
    pub(crate) max_idle_sleep: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            uncaught_errors: UncaughtErrorPolicy::Panic,
            capture_traces: true,
            max_idle_sleep: Duration::from_millis(50),
        }
    }
}

thread_local! {
    /// Configuration of the runtime currently driving this thread.
    ///
    /// Set by [`enter_context`] at the start of every `run` / `block_on`.
    static CURRENT_CONFIG: Cell<Option<RuntimeConfig>> = const { Cell::new(None) };

    /// Microtasks waiting for the next checkpoint.
    static MICROTASKS: RefCell<MicrotaskQueue> = RefCell::new(MicrotaskQueue::new());
}

// Restores the previous configuration even if the loop unwinds.
struct ContextGuard {
    previous: Option<RuntimeConfig>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_CONFIG.with(|current| current.set(self.previous));
    }
}

/// Enters a runtime context for the current thread.
///
/// Installs `config` for the duration of `function` and restores the previous
/// configuration on exit, including when `function` panics.
///
/// # Arguments
/// - `config`: The configuration to install.
/// - `function`: Closure to execute within this context.
pub(crate) fn enter_context<F, R>(config: RuntimeConfig, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT_CONFIG.with(|current| current.replace(Some(config)));
    let _guard = ContextGuard { previous };

    function()
}

/// Returns the configuration in effect on this thread.
pub(crate) fn config() -> RuntimeConfig {
    CURRENT_CONFIG.with(|current| current.get()).unwrap_or_default()
}

pub(crate) fn capture_traces() -> bool {
    config().capture_traces
}

pub(crate) fn uncaught_errors() -> UncaughtErrorPolicy {
    config().uncaught_errors
}

/// Queues `task` to run at the next microtask checkpoint, behind every microtask
/// already queued.
pub(crate) fn enqueue_microtask(task: Microtask) {
    MICROTASKS.with(|queue| {
        let mut queue = queue.borrow_mut();
        queue.push(task);
        trace!(pending = queue.len(), "microtask enqueued");
    });
}

/// Pops the oldest queued microtask. The queue is not borrowed while the task runs.
pub(crate) fn next_microtask() -> Option<Microtask> {
    MICROTASKS.with(|queue| queue.borrow_mut().pop())
}
