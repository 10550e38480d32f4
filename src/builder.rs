//! Fluent builder for Runtime construction.
//!
//! Provides a builder pattern interface for creating and configuring Runtime instances.

use crate::runtime::Runtime;
use crate::runtime::context::RuntimeConfig;

use std::time::Duration;

/// What the root zone does with an asynchronous error nobody handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UncaughtErrorPolicy {
    /// Panic out of the event loop, like an uncaught exception terminating a program.
    #[default]
    Panic,

    /// Report the error through `tracing::error!` and keep running.
    Log,
}

/// Builder for constructing Runtime instances with fluent API.
///
/// # Example
/// ```ignore
/// let rt = RuntimeBuilder::new()
///     .uncaught_errors(UncaughtErrorPolicy::Log)
///     .capture_traces(false)
///     .build();
/// ```
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Creates a new runtime builder with the default configuration.
    ///
    /// # Example
    /// ```ignore
    /// let builder = RuntimeBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Selects how the root zone treats unhandled asynchronous errors.
    pub fn uncaught_errors(mut self, policy: UncaughtErrorPolicy) -> Self {
        self.config.uncaught_errors = policy;
        self
    }

    /// Enables or disables backtrace capture for settlement errors.
    pub fn capture_traces(mut self, enabled: bool) -> Self {
        self.config.capture_traces = enabled;
        self
    }

    /// Caps a single blocking sleep of the loop while it waits for the next timer.
    pub fn max_idle_sleep(mut self, duration: Duration) -> Self {
        self.config.max_idle_sleep = duration;
        self
    }

    /// Builds and returns a configured Runtime instance.
    ///
    /// # Returns
    /// A newly constructed Runtime instance
    pub fn build(self) -> Runtime {
        Runtime::with_config(self.config)
    }
}
