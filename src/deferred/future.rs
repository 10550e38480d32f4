//! `.await` support for deferreds.

use crate::deferred::Deferred;
use crate::error::Failure;

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Future resolving to the result of a [`Deferred`].
///
/// Awaiting registers a listener, so an error observed this way is never reported
/// as unhandled.
pub struct DeferredFuture<T> {
    deferred: Deferred<T>,
    waker: Option<Rc<RefCell<Option<Waker>>>>,
}

impl<T: Clone + 'static> Future for DeferredFuture<T> {
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(result) = this.deferred.peek() {
            this.deferred.mark_handled();
            return Poll::Ready(result);
        }

        match &this.waker {
            Some(slot) => *slot.borrow_mut() = Some(cx.waker().clone()),
            None => {
                let slot = Rc::new(RefCell::new(Some(cx.waker().clone())));
                let notify = slot.clone();
                this.deferred.on_settled(move |_| {
                    let waker = notify.borrow_mut().take();
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });
                this.waker = Some(slot);
            }
        }

        Poll::Pending
    }
}

impl<T: Clone + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T, Failure>;
    type IntoFuture = DeferredFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        DeferredFuture {
            deferred: self,
            waker: None,
        }
    }
}
