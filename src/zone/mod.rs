//! Zones: execution contexts that follow asynchronous callbacks.
//!
//! A zone is an immutable node in a tree rooted at the per-thread root zone. Forking a
//! zone with a [`ZoneSpecification`] overrides some of its operations (running code,
//! registering callbacks, scheduling microtasks and timers, handling uncaught errors,
//! printing); everything not overridden delegates to the parent.
//!
//! Every continuation registered on a [`Deferred`](crate::Deferred) or a
//! [`StreamSubscription`](crate::StreamSubscription) captures [`Zone::current`] at
//! registration time and later runs inside that zone.
//!
//! # Error zones
//!
//! The nearest ancestor (or self) with a `handle_uncaught_error` hook is a zone's
//! *error zone*. Errors never cross from one error zone into another: a settlement error
//! whose listener lives in a different error zone is reported to the source zone's
//! handler instead.
//!
//! # Example
//!
//! ```ignore
//! use ripple::{Zone, ZoneSpecification, ZoneValues};
//!
//! let zone = Zone::current().fork(
//!     ZoneSpecification::new(),
//!     ZoneValues::new().with("request-id", 7u32),
//! );
//! zone.run(|| assert_eq!(Zone::current().get::<u32>("request-id"), Some(7)));
//! ```

mod delegate;
mod spec;
mod values;

pub use delegate::ZoneDelegate;
pub use spec::{
    CreatePeriodicTimerHook, CreateTimerHook, ErasedCallback, ErrorCallbackHook, ForkHook,
    HandleUncaughtErrorHook, PrintHook, RegisterHook, RunHook, ScheduleMicrotaskHook,
    ZoneSpecification,
};
pub use values::ZoneValues;

use crate::error::{AsyncError, Failure, StackTrace};
use crate::timer::Timer;
use crate::utils::once0;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

thread_local! {
    static ROOT: Zone = Zone(Rc::new(ZoneInner {
        parent: None,
        spec: ZoneSpecification::default(),
        values: ZoneValues::default(),
        intercepts_registration: false,
    }));

    /// The zone code is currently running in; `None` means the root zone.
    static CURRENT: RefCell<Option<Zone>> = const { RefCell::new(None) };
}

struct ZoneInner {
    parent: Option<Zone>,
    spec: ZoneSpecification,
    values: ZoneValues,
    // True if this zone or an ancestor installs a registration hook.
    intercepts_registration: bool,
}

/// Handle to a zone. Cloning is cheap; clones refer to the same zone.
#[derive(Clone)]
pub struct Zone(Rc<ZoneInner>);

/// Restores the previously current zone when dropped, including during unwinding.
pub(crate) struct ZoneGuard {
    previous: Option<Zone>,
}

impl Drop for ZoneGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

// Finds the nearest zone, starting at `from`, whose specification provides a hook.
// The delegate handed to the hook continues the search at that zone's parent.
fn lookup<H>(
    from: Option<Zone>,
    pick: fn(&ZoneSpecification) -> Option<H>,
) -> Option<(ZoneDelegate, H)> {
    let mut cursor = from;

    while let Some(zone) = cursor {
        if let Some(hook) = pick(&zone.0.spec) {
            return Some((ZoneDelegate::new(zone.parent()), hook));
        }
        cursor = zone.parent();
    }

    None
}

impl Zone {
    /// The root zone of this thread.
    pub fn root() -> Zone {
        ROOT.with(Zone::clone)
    }

    /// The zone code is currently running in.
    pub fn current() -> Zone {
        CURRENT
            .with(|current| current.borrow().clone())
            .unwrap_or_else(Zone::root)
    }

    pub(crate) fn new_child(parent: &Zone, spec: ZoneSpecification, values: ZoneValues) -> Zone {
        let intercepts_registration =
            spec.intercepts_registration() || parent.0.intercepts_registration;

        Zone(Rc::new(ZoneInner {
            parent: Some(parent.clone()),
            values: parent.0.values.overlay(&values),
            spec,
            intercepts_registration,
        }))
    }

    pub(crate) fn enter(&self) -> ZoneGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        ZoneGuard { previous }
    }

    // A delegate whose hook search starts at this zone itself.
    fn dispatch(&self) -> ZoneDelegate {
        ZoneDelegate::new(Some(self.clone()))
    }

    pub fn parent(&self) -> Option<Zone> {
        self.0.parent.clone()
    }

    pub fn is_root(&self) -> bool {
        self.0.parent.is_none()
    }

    /// Returns true when both handles refer to the same zone.
    pub fn ptr_eq(&self, other: &Zone) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// The nearest zone (self included) that handles uncaught errors. The root zone is
    /// its own error zone.
    pub fn error_zone(&self) -> Zone {
        let mut zone = self.clone();

        loop {
            if zone.0.spec.handle_uncaught_error.is_some() {
                return zone;
            }
            match zone.parent() {
                Some(parent) => zone = parent,
                None => return zone,
            }
        }
    }

    /// Returns true when errors may flow between the two zones.
    pub fn in_same_error_zone(&self, other: &Zone) -> bool {
        self.error_zone().ptr_eq(&other.error_zone())
    }

    /// Reads a value from the zone environment.
    pub fn get<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.0.values.get(key)
    }

    /// Creates a child zone. Unset hooks delegate to this zone; values overlay this
    /// zone's values.
    pub fn fork(&self, spec: ZoneSpecification, values: ZoneValues) -> Zone {
        self.dispatch().fork(self, spec, values)
    }

    /// Runs `body` with this zone as the current zone and restores the previous zone
    /// afterwards.
    pub fn run<R>(&self, body: impl FnOnce() -> R) -> R {
        self.run_through(|hooks| hooks.run.clone(), body)
    }

    pub fn run_unary<A, R>(&self, f: impl FnOnce(A) -> R, arg: A) -> R {
        self.run_through(|hooks| hooks.run_unary.clone(), move || f(arg))
    }

    pub fn run_binary<A, B, R>(&self, f: impl FnOnce(A, B) -> R, first: A, second: B) -> R {
        self.run_through(|hooks| hooks.run_binary.clone(), move || f(first, second))
    }

    fn run_through<R>(
        &self,
        pick: fn(&ZoneSpecification) -> Option<RunHook>,
        body: impl FnOnce() -> R,
    ) -> R {
        let Some((delegate, hook)) = lookup(Some(self.clone()), pick) else {
            let _guard = self.enter();
            return body();
        };

        let mut body = Some(body);
        let mut output = None;
        hook(&delegate, self, &mut || {
            if let Some(body) = body.take() {
                output = Some(body());
            }
        });

        output.expect("zone run hook returned without running its body")
    }

    /// Runs a fallible `body` in this zone. An `Err` is reported to this zone's
    /// uncaught-error handler and `None` is returned.
    pub fn run_guarded<R>(&self, body: impl FnOnce() -> Result<R, AsyncError>) -> Option<R> {
        match self.run(body) {
            Ok(value) => Some(value),
            Err(error) => {
                self.handle_uncaught_error(Failure::new(error, StackTrace::capture()));
                None
            }
        }
    }

    fn register_erased(
        &self,
        pick: fn(&ZoneSpecification) -> Option<RegisterHook>,
        callback: ErasedCallback,
    ) -> ErasedCallback {
        match lookup(Some(self.clone()), pick) {
            Some((delegate, hook)) => hook(&delegate, self, callback),
            None => callback,
        }
    }

    /// Passes `f` through the zone's registration hooks.
    pub fn register_callback<R: 'static>(&self, f: impl Fn() -> R + 'static) -> Rc<dyn Fn() -> R> {
        if !self.0.intercepts_registration {
            return Rc::new(f);
        }

        let output: Rc<RefCell<Option<R>>> = Rc::default();
        let erased: ErasedCallback = {
            let output = output.clone();
            Rc::new(move || {
                let value = f();
                *output.borrow_mut() = Some(value);
            })
        };

        let wrapped = self.register_erased(|hooks| hooks.register_callback.clone(), erased);
        Rc::new(move || {
            wrapped();
            take_output(&output)
        })
    }

    pub fn register_unary_callback<A: 'static, R: 'static>(
        &self,
        f: impl Fn(A) -> R + 'static,
    ) -> Rc<dyn Fn(A) -> R> {
        if !self.0.intercepts_registration {
            return Rc::new(f);
        }

        let input: Rc<RefCell<Option<A>>> = Rc::default();
        let output: Rc<RefCell<Option<R>>> = Rc::default();
        let erased: ErasedCallback = {
            let (input, output) = (input.clone(), output.clone());
            Rc::new(move || {
                let arg = input.borrow_mut().take();
                if let Some(arg) = arg {
                    let value = f(arg);
                    *output.borrow_mut() = Some(value);
                }
            })
        };

        let wrapped = self.register_erased(|hooks| hooks.register_unary_callback.clone(), erased);
        Rc::new(move |arg: A| {
            *input.borrow_mut() = Some(arg);
            wrapped();
            take_output(&output)
        })
    }

    pub fn register_binary_callback<A: 'static, B: 'static, R: 'static>(
        &self,
        f: impl Fn(A, B) -> R + 'static,
    ) -> Rc<dyn Fn(A, B) -> R> {
        if !self.0.intercepts_registration {
            return Rc::new(f);
        }

        let input: Rc<RefCell<Option<(A, B)>>> = Rc::default();
        let output: Rc<RefCell<Option<R>>> = Rc::default();
        let erased: ErasedCallback = {
            let (input, output) = (input.clone(), output.clone());
            Rc::new(move || {
                let args = input.borrow_mut().take();
                if let Some((first, second)) = args {
                    let value = f(first, second);
                    *output.borrow_mut() = Some(value);
                }
            })
        };

        let wrapped = self.register_erased(|hooks| hooks.register_binary_callback.clone(), erased);
        Rc::new(move |first: A, second: B| {
            *input.borrow_mut() = Some((first, second));
            wrapped();
            take_output(&output)
        })
    }

    /// Registers `f` and returns a callback that runs it inside this zone, whatever zone
    /// it is later invoked from.
    pub fn bind_callback<R: 'static>(&self, f: impl Fn() -> R + 'static) -> impl Fn() -> R + 'static {
        let registered = self.register_callback(f);
        let zone = self.clone();
        move || zone.run(|| registered())
    }

    pub fn bind_unary_callback<A: 'static, R: 'static>(
        &self,
        f: impl Fn(A) -> R + 'static,
    ) -> impl Fn(A) -> R + 'static {
        let registered = self.register_unary_callback(f);
        let zone = self.clone();
        move |arg| zone.run_unary(|arg| registered(arg), arg)
    }

    pub fn bind_binary_callback<A: 'static, B: 'static, R: 'static>(
        &self,
        f: impl Fn(A, B) -> R + 'static,
    ) -> impl Fn(A, B) -> R + 'static {
        let registered = self.register_binary_callback(f);
        let zone = self.clone();
        move |first, second| zone.run_binary(|a, b| registered(a, b), first, second)
    }

    /// Like [`bind_callback`](Zone::bind_callback), but errors returned by `f` go to this
    /// zone's uncaught-error handler.
    pub fn bind_callback_guarded(
        &self,
        f: impl Fn() -> Result<(), AsyncError> + 'static,
    ) -> impl Fn() + 'static {
        let registered = self.register_callback(f);
        let zone = self.clone();
        move || {
            zone.run_guarded(|| registered());
        }
    }

    // Registers a single-use task and wraps it so it runs inside this zone.
    pub(crate) fn bind_once(&self, task: Box<dyn FnOnce()>) -> Box<dyn FnOnce()> {
        let zone = self.clone();

        if !self.0.intercepts_registration {
            return Box::new(move || zone.run(task));
        }

        let registered = self.register_callback(once0(task));
        Box::new(move || zone.run(|| registered()))
    }

    pub(crate) fn bind_periodic(&self, callback: Box<dyn FnMut(&Timer)>) -> Box<dyn FnMut(&Timer)> {
        let callback = RefCell::new(callback);
        let registered = self.register_unary_callback(move |timer: Timer| {
            let mut callback = callback.borrow_mut();
            (*callback)(&timer)
        });

        let zone = self.clone();
        Box::new(move |timer: &Timer| zone.run_unary(|timer: Timer| registered(timer), timer.clone()))
    }

    /// Gives the zone a chance to replace an error before it settles a completer.
    pub fn error_callback(&self, failure: &Failure) -> Option<Failure> {
        self.dispatch().error_callback(self, failure)
    }

    /// Queues `task` as a microtask that runs inside this zone.
    pub fn schedule_microtask(&self, task: impl FnOnce() + 'static) {
        self.dispatch().schedule_microtask(self, Box::new(task))
    }

    /// Arms a one-shot timer whose callback runs inside this zone.
    pub fn create_timer(&self, duration: Duration, callback: impl FnOnce() + 'static) -> Timer {
        self.dispatch().create_timer(self, duration, Box::new(callback))
    }

    /// Arms a periodic timer whose callback runs inside this zone.
    pub fn create_periodic_timer(
        &self,
        period: Duration,
        callback: impl FnMut(&Timer) + 'static,
    ) -> Timer {
        self.dispatch().create_periodic_timer(self, period, Box::new(callback))
    }

    /// Reports an error nobody handled.
    pub fn handle_uncaught_error(&self, failure: Failure) {
        self.dispatch().handle_uncaught_error(self, failure)
    }

    pub fn print(&self, line: &str) {
        self.dispatch().print(self, line)
    }
}

impl fmt::Debug for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(zone) = cursor {
            depth += 1;
            cursor = zone.parent();
        }

        f.debug_struct("Zone")
            .field("depth", &depth)
            .field("values", &self.0.values)
            .finish()
    }
}

fn take_output<R>(output: &RefCell<Option<R>>) -> R {
    output
        .borrow_mut()
        .take()
        .expect("registered callback was replaced by one that never ran")
}

/// Prints a line through the current zone's print hook.
pub fn print(line: &str) {
    Zone::current().print(line)
}

/// Forks the current zone and runs `body` inside the child.
pub fn run_in_new_zone<R>(
    body: impl FnOnce() -> R,
    values: ZoneValues,
    spec: ZoneSpecification,
) -> R {
    Zone::current().fork(spec, values).run(body)
}

/// Forks the current zone as a new error zone reporting to `on_error`, and runs a
/// fallible `body` inside it. An `Err` from `body` is reported to `on_error` as well.
pub fn run_in_new_zone_guarded<R>(
    body: impl FnOnce() -> Result<R, AsyncError>,
    on_error: impl Fn(Failure) + 'static,
    values: ZoneValues,
    spec: ZoneSpecification,
) -> Option<R> {
    let spec = spec.on_handle_uncaught_error(move |_, _, failure| on_error(failure));
    Zone::current().fork(spec, values).run_guarded(body)
}
