//! Adapters turning single-use closures into `Fn` closures.
//!
//! Zone registration hooks work on shareable `Fn` callbacks, while continuations are
//! naturally `FnOnce`. Calling an adapted closure a second time is an internal bug.

use std::cell::RefCell;

const CALLED_TWICE: &str = "single-use callback invoked twice";

pub(crate) fn once0<R>(f: impl FnOnce() -> R) -> impl Fn() -> R {
    let slot = RefCell::new(Some(f));

    move || {
        let f = slot.borrow_mut().take().expect(CALLED_TWICE);
        f()
    }
}

pub(crate) fn once1<A, R>(f: impl FnOnce(A) -> R) -> impl Fn(A) -> R {
    let slot = RefCell::new(Some(f));

    move |a| {
        let f = slot.borrow_mut().take().expect(CALLED_TWICE);
        f(a)
    }
}

pub(crate) fn once2<A, B, R>(f: impl FnOnce(A, B) -> R) -> impl Fn(A, B) -> R {
    let slot = RefCell::new(Some(f));

    move |a, b| {
        let f = slot.borrow_mut().take().expect(CALLED_TWICE);
        f(a, b)
    }
}
