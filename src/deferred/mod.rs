//! Deferred computations: settle-once values with chainable continuations.
//!
//! A [`Deferred<T>`] starts pending and settles exactly once, either with a value or with
//! a [`Failure`]. Continuations registered with [`then`](Deferred::then),
//! [`catch_error`](Deferred::catch_error) and friends each produce a new deferred and run
//! inside the zone that was current when they were registered.
//!
//! Continuations never run inline with the registration: on an already settled deferred
//! they are delivered from a microtask.
//!
//! # Example
//!
//! ```ignore
//! use ripple::{Completer, Runtime};
//!
//! let completer = Completer::new();
//! let next = completer.deferred().map(|v: i32| v + 1);
//! completer.complete(42).unwrap();
//!
//! let mut rt = Runtime::new();
//! assert_eq!(rt.block_on(next).unwrap(), 43);
//! ```

mod combinators;
mod completer;
mod future;
mod listener;

pub use combinators::{first_of, wait_all};
pub use completer::Completer;
pub use future::DeferredFuture;

use crate::error::{AsyncError, Failure, StackTrace, StateError};
use crate::utils::{once0, once1, once2};
use crate::zone::Zone;
use listener::{
    CallbackReaction, CatchReaction, FinallyReaction, ListenerChain, Reaction, ThenReaction,
    bounce,
};

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{trace, warn};

/// What a continuation produced: a value, or another deferred to wait for.
pub enum Outcome<T> {
    Ready(T),
    Chain(Deferred<T>),
}

/// Decides whether an error handler applies to an error.
pub type ErrorTest = Box<dyn Fn(&AsyncError) -> bool>;

pub(crate) type RegisteredErrorHandler<S> =
    Rc<dyn Fn(AsyncError, StackTrace) -> Result<Outcome<S>, AsyncError>>;

/// An error continuation, taking the error alone or the error and its trace.
pub enum ErrorHandler<S> {
    Unary(Box<dyn FnOnce(AsyncError) -> Result<Outcome<S>, AsyncError>>),
    Binary(Box<dyn FnOnce(AsyncError, StackTrace) -> Result<Outcome<S>, AsyncError>>),
}

impl<S: 'static> ErrorHandler<S> {
    pub fn unary(f: impl FnOnce(AsyncError) -> Result<Outcome<S>, AsyncError> + 'static) -> Self {
        Self::Unary(Box::new(f))
    }

    pub fn binary(
        f: impl FnOnce(AsyncError, StackTrace) -> Result<Outcome<S>, AsyncError> + 'static,
    ) -> Self {
        Self::Binary(Box::new(f))
    }

    /// A handler that always recovers with the value computed from the error.
    pub fn recover(f: impl FnOnce(AsyncError) -> S + 'static) -> Self {
        Self::unary(move |error| Ok(Outcome::Ready(f(error))))
    }

    fn register(self, zone: &Zone) -> RegisteredErrorHandler<S> {
        match self {
            Self::Unary(f) => {
                let f = zone.register_unary_callback(once1(f));
                Rc::new(move |error: AsyncError, _trace: StackTrace| f(error))
            }
            Self::Binary(f) => {
                let f = zone.register_binary_callback(once2(f));
                Rc::new(move |error: AsyncError, trace: StackTrace| f(error, trace))
            }
        }
    }
}

enum State<T> {
    Pending,
    Chained(Deferred<T>),
    Value(T),
    Error(Failure),
}

struct Core<T> {
    state: State<T>,
    listeners: ListenerChain<T>,
    zone: Zone,
    // A listener observed the result, so an error is not reported as unhandled.
    handled: bool,
}

impl<T: Clone> Core<T> {
    fn settled(&self) -> Option<Result<T, Failure>> {
        match &self.state {
            State::Value(value) => Some(Ok(value.clone())),
            State::Error(failure) => Some(Err(failure.clone())),
            State::Pending | State::Chained(_) => None,
        }
    }
}

// Followed links are unwound in a loop; a long `Chained` list would otherwise be dropped
// recursively.
impl<T> Drop for Core<T> {
    fn drop(&mut self) {
        let mut state = std::mem::replace(&mut self.state, State::Pending);

        while let State::Chained(next) = state {
            state = match Rc::try_unwrap(next.0) {
                Ok(cell) => {
                    let mut core = cell.into_inner();
                    std::mem::replace(&mut core.state, State::Pending)
                }
                Err(_) => break,
            };
        }
    }
}

/// A value or error that becomes available later, exactly once.
///
/// Cloning a `Deferred` yields another handle to the same computation.
pub struct Deferred<T>(Rc<RefCell<Core<T>>>);

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> Deferred<T> {
    pub(crate) fn pending() -> Self {
        Self::pending_in(Zone::current())
    }

    pub(crate) fn pending_in(zone: Zone) -> Self {
        Self(Rc::new(RefCell::new(Core {
            state: State::Pending,
            listeners: ListenerChain::default(),
            zone,
            handled: false,
        })))
    }

    /// A deferred that settles with `value` on a microtask.
    pub fn value(value: T) -> Self {
        let deferred = Self::pending();
        deferred.settle_later(Ok(value));
        deferred
    }

    /// A deferred that settles with `error` on a microtask.
    pub fn error(error: impl Into<AsyncError>) -> Self {
        Self::error_with_trace(error.into(), StackTrace::capture())
    }

    pub fn error_with_trace(error: AsyncError, trace: StackTrace) -> Self {
        let deferred = Self::pending();
        deferred.settle_later(Err(Failure::new(error, trace)));
        deferred
    }

    /// Runs `computation` immediately and wraps its outcome. A returned deferred is
    /// passed through as is.
    pub fn sync(computation: impl FnOnce() -> Result<Outcome<T>, AsyncError>) -> Self {
        match computation() {
            Ok(Outcome::Ready(value)) => Self::value(value),
            Ok(Outcome::Chain(deferred)) => deferred,
            Err(error) => Self::error(error),
        }
    }

    /// Runs `computation` on a microtask of the current zone.
    pub fn microtask(computation: impl FnOnce() -> Result<Outcome<T>, AsyncError> + 'static) -> Self {
        let deferred = Self::pending();
        let target = deferred.clone();
        Zone::current().schedule_microtask(move || target.settle_from_handler(computation(), None));
        deferred
    }

    /// Runs `computation` after `duration`, on a timer of the current zone.
    pub fn delayed(
        duration: Duration,
        computation: impl FnOnce() -> Result<Outcome<T>, AsyncError> + 'static,
    ) -> Self {
        let deferred = Self::pending();
        let target = deferred.clone();
        Zone::current().create_timer(duration, move || {
            target.settle_from_handler(computation(), None)
        });
        deferred
    }

    /// The zone this deferred was created in. Unhandled errors are reported there.
    pub fn zone(&self) -> Zone {
        self.0.borrow().zone.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.peek().is_some()
    }

    /// The settled result, without registering a listener.
    pub fn peek(&self) -> Option<Result<T, Failure>> {
        let root = self.chain_root();
        let settled = root.0.borrow().settled();
        settled
    }

    /// Registers continuations and returns the deferred settled with their outcome.
    ///
    /// `on_value` runs on success. On error, `on_error` runs if present and `test`
    /// (default: always true) accepts the error; otherwise the error passes through.
    pub fn register<S, F>(
        &self,
        on_value: F,
        on_error: Option<ErrorHandler<S>>,
        test: Option<ErrorTest>,
    ) -> Deferred<S>
    where
        S: Clone + 'static,
        F: FnOnce(T) -> Result<Outcome<S>, AsyncError> + 'static,
    {
        let zone = Zone::current();
        let target = Deferred::pending_in(zone.clone());
        let on_value = zone.register_unary_callback(once1(on_value));
        let on_error = on_error.map(|handler| handler.register(&zone));

        self.add_listener(Box::new(ThenReaction {
            zone,
            target: target.clone(),
            on_value,
            on_error,
            test,
        }));

        target
    }

    /// Chains a fallible transformation of the value.
    pub fn then<S, F>(&self, f: F) -> Deferred<S>
    where
        S: Clone + 'static,
        F: FnOnce(T) -> Result<S, AsyncError> + 'static,
    {
        self.register(move |value| f(value).map(Outcome::Ready), None, None)
    }

    /// Chains an infallible transformation of the value.
    pub fn map<S, F>(&self, f: F) -> Deferred<S>
    where
        S: Clone + 'static,
        F: FnOnce(T) -> S + 'static,
    {
        self.register(move |value| Ok(Outcome::Ready(f(value))), None, None)
    }

    /// Chains a continuation that produces another deferred.
    pub fn and_then<S, F>(&self, f: F) -> Deferred<S>
    where
        S: Clone + 'static,
        F: FnOnce(T) -> Deferred<S> + 'static,
    {
        self.register(move |value| Ok(Outcome::Chain(f(value))), None, None)
    }

    /// Handles errors accepted by `test`; values pass through unchanged.
    pub fn catch_error(&self, handler: ErrorHandler<T>, test: Option<ErrorTest>) -> Deferred<T> {
        let zone = Zone::current();
        let target = Deferred::pending_in(zone.clone());
        let on_error = handler.register(&zone);

        self.add_listener(Box::new(CatchReaction {
            zone,
            target: target.clone(),
            on_error,
            test,
        }));

        target
    }

    /// Runs `action` whatever the outcome, then settles with the original outcome.
    ///
    /// If `action` fails, or chains to a deferred that fails, that failure wins.
    pub fn finally_do<F>(&self, action: F) -> Deferred<T>
    where
        F: FnOnce() -> Result<Outcome<()>, AsyncError> + 'static,
    {
        let zone = Zone::current();
        let target = Deferred::pending_in(zone.clone());
        let action = zone.register_callback(once0(action));

        self.add_listener(Box::new(FinallyReaction {
            zone,
            target: target.clone(),
            action,
        }));

        target
    }

    /// Calls `callback` with the result, in the current zone. Counts as handling an error.
    pub fn on_settled(&self, callback: impl FnOnce(Result<T, Failure>) + 'static) {
        let zone = Zone::current();
        let callback = zone.register_unary_callback(once1(callback));
        self.add_listener(Box::new(CallbackReaction { zone, callback }));
    }

    // Records that the result was observed without a listener.
    pub(crate) fn mark_handled(&self) {
        self.chain_root().0.borrow_mut().handled = true;
    }

    // Hands out the listeners of a deferred only the caller still references. Nothing
    // can settle it any more, so they can never fire.
    pub(crate) fn take_orphaned_listeners(&self) -> Option<Box<dyn Any>> {
        if Rc::strong_count(&self.0) > 1 {
            return None;
        }

        let listeners = std::mem::take(&mut self.0.try_borrow_mut().ok()?.listeners);
        if listeners.is_empty() {
            return None;
        }
        Some(Box::new(listeners))
    }

    fn chain_root(&self) -> Deferred<T> {
        let mut current = self.clone();

        loop {
            let next = match &current.0.borrow().state {
                State::Chained(next) => Some(next.clone()),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    pub(crate) fn add_listener(&self, reaction: Box<dyn Reaction<T>>) {
        let root = self.chain_root();

        let (result, source) = {
            let mut core = root.0.borrow_mut();
            let Some(result) = core.settled() else {
                core.listeners.push(reaction);
                return;
            };
            core.handled = true;
            (result, core.zone.clone())
        };

        Zone::current().schedule_microtask(move || deliver(&source, &result, reaction));
    }

    fn settle_later(&self, result: Result<T, Failure>) {
        let target = self.clone();
        self.zone().schedule_microtask(move || target.settle(result));
    }

    /// Settles now and fires the listeners. Ignored if already resolved.
    pub(crate) fn settle(&self, result: Result<T, Failure>) {
        let (listeners, zone) = {
            let mut core = self.0.borrow_mut();
            if !matches!(core.state, State::Pending) {
                trace!("settlement of a resolved deferred ignored");
                return;
            }

            core.state = match &result {
                Ok(value) => State::Value(value.clone()),
                Err(failure) => State::Error(failure.clone()),
            };
            if !core.listeners.is_empty() {
                core.handled = true;
            }
            (std::mem::take(&mut core.listeners), core.zone.clone())
        };

        trace!(listeners = listeners.len(), ok = result.is_ok(), "deferred settled");

        if listeners.is_empty() {
            if let Err(failure) = result {
                self.report_if_unhandled(zone, failure);
            }
            return;
        }

        propagate(zone, result, listeners);
    }

    fn report_if_unhandled(&self, zone: Zone, failure: Failure) {
        let deferred = self.clone();
        let reporter = zone.clone();

        zone.schedule_microtask(move || {
            let handled = deferred.0.borrow().handled;
            if !handled {
                reporter.handle_uncaught_error(failure);
            }
        });
    }

    pub(crate) fn resolve(&self, outcome: Outcome<T>) {
        match outcome {
            Outcome::Ready(value) => self.settle(Ok(value)),
            Outcome::Chain(source) => self.chain_to(source),
        }
    }

    /// Settles with a continuation's outcome. A returned error identical to `original`
    /// keeps the original trace.
    pub(crate) fn settle_from_handler(
        &self,
        produced: Result<Outcome<T>, AsyncError>,
        original: Option<&Failure>,
    ) {
        match produced {
            Ok(outcome) => self.resolve(outcome),
            Err(error) => {
                let trace = match original {
                    Some(failure) if failure.error.ptr_eq(&error) => failure.trace.clone(),
                    _ => StackTrace::capture(),
                };
                self.settle(Err(Failure::new(error, trace)));
            }
        }
    }

    // Makes this deferred follow `source`: settled right away if the chain root already
    // settled, otherwise its listeners move to the root.
    fn chain_to(&self, source: Deferred<T>) {
        let root = source.chain_root();

        if Rc::ptr_eq(&root.0, &self.0) {
            self.settle(Err(Failure::capture(StateError::ChainedToItself)));
            return;
        }

        let settled = {
            let mut core = root.0.borrow_mut();
            let settled = core.settled();
            if settled.is_some() {
                core.handled = true;
            }
            settled
        };

        match settled {
            Some(result) => self.settle(result),
            None => {
                let listeners = {
                    let mut core = self.0.borrow_mut();
                    if !matches!(core.state, State::Pending) {
                        return;
                    }
                    core.state = State::Chained(root.clone());
                    std::mem::take(&mut core.listeners)
                };
                root.0.borrow_mut().listeners.append(listeners);
            }
        }
    }
}

fn propagate<T: Clone + 'static>(
    source: Zone,
    result: Result<T, Failure>,
    mut listeners: ListenerChain<T>,
) {
    bounce(Box::new(move || match listeners.pop_front() {
        Some(reaction) => {
            deliver(&source, &result, reaction);
            !listeners.is_empty()
        }
        None => false,
    }));
}

// Hands the result to one reaction. Errors never enter another error zone.
fn deliver<T: Clone + 'static>(
    source: &Zone,
    result: &Result<T, Failure>,
    reaction: Box<dyn Reaction<T>>,
) {
    if let Err(failure) = result {
        if !source.in_same_error_zone(reaction.zone()) {
            warn!(error = %failure.error, "error crossed an error-zone boundary, reported to its source zone");
            source.handle_uncaught_error(failure.clone());
            return;
        }
    }

    reaction.fire(result.clone());
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0.try_borrow() {
            Ok(core) => match core.state {
                State::Pending => "pending",
                State::Chained(_) => "chained",
                State::Value(_) => "value",
                State::Error(_) => "error",
            },
            Err(_) => "busy",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}
