//! Hook set of a forked zone.
//!
//! Every hook receives a [`ZoneDelegate`] (to continue with the parent's behavior) and
//! the zone the operation was invoked on. Unset hooks delegate to the parent.
//!
//! # Example
//!
//! ```ignore
//! let spec = ZoneSpecification::new()
//!     .on_handle_uncaught_error(|_, _, failure| eprintln!("caught: {failure}"))
//!     .on_print(|parent, zone, line| parent.print(zone, &format!("[child] {line}")));
//! let zone = Zone::current().fork(spec, ZoneValues::new());
//! ```

use crate::error::Failure;
use crate::timer::Timer;
use crate::zone::{Zone, ZoneDelegate, ZoneValues};

use std::rc::Rc;
use std::time::Duration;

/// A type-erased callback passed through the registration hooks.
///
/// Arguments and results of unary and binary callbacks travel out of band, so a hook
/// only ever wraps a nullary `Fn()`.
pub type ErasedCallback = Rc<dyn Fn()>;

pub type RunHook = Rc<dyn Fn(&ZoneDelegate, &Zone, &mut dyn FnMut())>;
pub type RegisterHook = Rc<dyn Fn(&ZoneDelegate, &Zone, ErasedCallback) -> ErasedCallback>;
pub type ErrorCallbackHook = Rc<dyn Fn(&ZoneDelegate, &Zone, &Failure) -> Option<Failure>>;
pub type ScheduleMicrotaskHook = Rc<dyn Fn(&ZoneDelegate, &Zone, Box<dyn FnOnce()>)>;
pub type CreateTimerHook = Rc<dyn Fn(&ZoneDelegate, &Zone, Duration, Box<dyn FnOnce()>) -> Timer>;
pub type CreatePeriodicTimerHook =
    Rc<dyn Fn(&ZoneDelegate, &Zone, Duration, Box<dyn FnMut(&Timer)>) -> Timer>;
pub type HandleUncaughtErrorHook = Rc<dyn Fn(&ZoneDelegate, &Zone, Failure)>;
pub type PrintHook = Rc<dyn Fn(&ZoneDelegate, &Zone, &str)>;
pub type ForkHook = Rc<dyn Fn(&ZoneDelegate, &Zone, ZoneSpecification, ZoneValues) -> Zone>;

/// Overrides installed on a forked zone.
#[derive(Clone, Default)]
pub struct ZoneSpecification {
    pub(crate) run: Option<RunHook>,
    pub(crate) run_unary: Option<RunHook>,
    pub(crate) run_binary: Option<RunHook>,
    pub(crate) register_callback: Option<RegisterHook>,
    pub(crate) register_unary_callback: Option<RegisterHook>,
    pub(crate) register_binary_callback: Option<RegisterHook>,
    pub(crate) error_callback: Option<ErrorCallbackHook>,
    pub(crate) schedule_microtask: Option<ScheduleMicrotaskHook>,
    pub(crate) create_timer: Option<CreateTimerHook>,
    pub(crate) create_periodic_timer: Option<CreatePeriodicTimerHook>,
    pub(crate) handle_uncaught_error: Option<HandleUncaughtErrorHook>,
    pub(crate) print: Option<PrintHook>,
    pub(crate) fork: Option<ForkHook>,
}

impl ZoneSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intercepts [`Zone::run`]. The hook must call the body at most once.
    pub fn on_run(mut self, hook: impl Fn(&ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static) -> Self {
        self.run = Some(Rc::new(hook));
        self
    }

    pub fn on_run_unary(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static,
    ) -> Self {
        self.run_unary = Some(Rc::new(hook));
        self
    }

    pub fn on_run_binary(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &mut dyn FnMut()) + 'static,
    ) -> Self {
        self.run_binary = Some(Rc::new(hook));
        self
    }

    /// Intercepts callback registration. The returned callback replaces the registered one.
    pub fn on_register_callback(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, ErasedCallback) -> ErasedCallback + 'static,
    ) -> Self {
        self.register_callback = Some(Rc::new(hook));
        self
    }

    pub fn on_register_unary_callback(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, ErasedCallback) -> ErasedCallback + 'static,
    ) -> Self {
        self.register_unary_callback = Some(Rc::new(hook));
        self
    }

    pub fn on_register_binary_callback(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, ErasedCallback) -> ErasedCallback + 'static,
    ) -> Self {
        self.register_binary_callback = Some(Rc::new(hook));
        self
    }

    /// Intercepts errors before they settle a completer. Returning `Some` replaces the failure.
    pub fn on_error_callback(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, &Failure) -> Option<Failure> + 'static,
    ) -> Self {
        self.error_callback = Some(Rc::new(hook));
        self
    }

    pub fn on_schedule_microtask(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, Box<dyn FnOnce()>) + 'static,
    ) -> Self {
        self.schedule_microtask = Some(Rc::new(hook));
        self
    }

    pub fn on_create_timer(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, Duration, Box<dyn FnOnce()>) -> Timer + 'static,
    ) -> Self {
        self.create_timer = Some(Rc::new(hook));
        self
    }

    pub fn on_create_periodic_timer(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, Duration, Box<dyn FnMut(&Timer)>) -> Timer + 'static,
    ) -> Self {
        self.create_periodic_timer = Some(Rc::new(hook));
        self
    }

    /// Makes the zone an error zone: unhandled errors raised inside it end up here.
    pub fn on_handle_uncaught_error(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, Failure) + 'static,
    ) -> Self {
        self.handle_uncaught_error = Some(Rc::new(hook));
        self
    }

    pub fn on_print(mut self, hook: impl Fn(&ZoneDelegate, &Zone, &str) + 'static) -> Self {
        self.print = Some(Rc::new(hook));
        self
    }

    pub fn on_fork(
        mut self,
        hook: impl Fn(&ZoneDelegate, &Zone, ZoneSpecification, ZoneValues) -> Zone + 'static,
    ) -> Self {
        self.fork = Some(Rc::new(hook));
        self
    }

    pub(crate) fn intercepts_registration(&self) -> bool {
        self.register_callback.is_some()
            || self.register_unary_callback.is_some()
            || self.register_binary_callback.is_some()
    }
}
