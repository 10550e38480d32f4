//! Time limit for a single deferred.

use crate::deferred::{Deferred, Outcome};
use crate::error::{AsyncError, Failure, TimeoutError};
use crate::utils::once0;
use crate::zone::Zone;

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

impl<T: Clone + 'static> Deferred<T> {
    /// Races this deferred against a timer of `duration`.
    ///
    /// Whichever finishes first decides the result; the other outcome is discarded.
    /// If the timer wins, the result is a [`TimeoutError`].
    pub fn timeout(&self, duration: Duration) -> Deferred<T> {
        self.race_timer(duration, None)
    }

    /// Like [`timeout`](Deferred::timeout), but when the timer wins the result comes
    /// from `on_timeout`.
    pub fn timeout_with(
        &self,
        duration: Duration,
        on_timeout: impl FnOnce() -> Result<Outcome<T>, AsyncError> + 'static,
    ) -> Deferred<T> {
        let on_timeout = Zone::current().register_callback(once0(on_timeout));
        self.race_timer(duration, Some(on_timeout))
    }

    fn race_timer(
        &self,
        duration: Duration,
        on_timeout: Option<Rc<dyn Fn() -> Result<Outcome<T>, AsyncError>>>,
    ) -> Deferred<T> {
        let result = Deferred::pending();
        let decided = Rc::new(Cell::new(false));

        let timer = {
            let result = result.clone();
            let decided = decided.clone();
            Zone::current().create_timer(duration, move || {
                if decided.replace(true) {
                    return;
                }
                match on_timeout {
                    Some(on_timeout) => result.settle_from_handler(on_timeout(), None),
                    None => result.settle(Err(Failure::capture(TimeoutError { duration }))),
                }
            })
        };

        let settled = result.clone();
        self.on_settled(move |outcome| {
            if decided.replace(true) {
                return;
            }
            timer.cancel();
            settled.settle(outcome);
        });

        result
    }
}
