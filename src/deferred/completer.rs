use crate::deferred::listener::inline;
use crate::deferred::{Deferred, Outcome};
use crate::error::{AsyncError, Failure, StackTrace, UsageError};
use crate::zone::Zone;

use std::cell::Cell;
use std::rc::Rc;

/// The write side of a [`Deferred`].
///
/// A completer settles its deferred at most once; a second `complete*` call returns
/// [`UsageError::AlreadyCompleted`] and leaves the result untouched.
///
/// The default flavor settles on a microtask. A [`sync`](Completer::sync) completer
/// settles inside the call, so listeners run before `complete` returns, also when
/// `complete` is called from another deferred's listener. Use it only when the call
/// itself already happens asynchronously.
pub struct Completer<T> {
    deferred: Deferred<T>,
    completed: Rc<Cell<bool>>,
    sync: bool,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
            completed: self.completed.clone(),
            sync: self.sync,
        }
    }
}

impl<T: Clone + 'static> Completer<T> {
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    pub fn sync() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(sync: bool) -> Self {
        Self {
            deferred: Deferred::pending(),
            completed: Rc::new(Cell::new(false)),
            sync,
        }
    }

    /// The read side handed to consumers.
    pub fn deferred(&self) -> Deferred<T> {
        self.deferred.clone()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub fn complete(&self, value: T) -> Result<(), UsageError> {
        self.complete_with(Outcome::Ready(value))
    }

    /// Completes with a value or with the eventual result of another deferred.
    pub fn complete_with(&self, outcome: Outcome<T>) -> Result<(), UsageError> {
        self.claim()?;

        if self.sync {
            inline(|| self.deferred.resolve(outcome));
        } else {
            let deferred = self.deferred.clone();
            self.deferred
                .zone()
                .schedule_microtask(move || deferred.resolve(outcome));
        }

        Ok(())
    }

    /// Completes with an error. Without `trace`, the current stack is captured.
    ///
    /// The current zone's `error_callback` hook may replace the failure first.
    pub fn complete_error(
        &self,
        error: impl Into<AsyncError>,
        trace: Option<StackTrace>,
    ) -> Result<(), UsageError> {
        self.claim()?;

        let failure = Failure::new(error.into(), trace.unwrap_or_else(StackTrace::capture));
        let failure = Zone::current().error_callback(&failure).unwrap_or(failure);

        if self.sync {
            inline(|| self.deferred.settle(Err(failure)));
        } else {
            let deferred = self.deferred.clone();
            self.deferred
                .zone()
                .schedule_microtask(move || deferred.settle(Err(failure)));
        }

        Ok(())
    }

    fn claim(&self) -> Result<(), UsageError> {
        if self.completed.replace(true) {
            return Err(UsageError::AlreadyCompleted);
        }
        Ok(())
    }
}

impl<T: Clone + 'static> Default for Completer<T> {
    fn default() -> Self {
        Self::new()
    }
}
