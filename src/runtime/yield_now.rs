use crate::zone::Zone;

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Cooperative scheduler hint: yields once to the microtask queue.
///
/// The first poll queues a microtask behind every microtask already pending and
/// returns `Pending`; the task resumes once that microtask ran.
pub async fn yield_now() {
    struct YieldOnce {
        resumed: Option<Rc<Cell<bool>>>,
    }

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            match &self.resumed {
                Some(resumed) if resumed.get() => Poll::Ready(()),
                Some(_) => Poll::Pending,
                None => {
                    let resumed = Rc::new(Cell::new(false));
                    let flag = resumed.clone();
                    let waker = cx.waker().clone();

                    Zone::current().schedule_microtask(move || {
                        flag.set(true);
                        waker.wake();
                    });

                    self.resumed = Some(resumed);
                    Poll::Pending
                }
            }
        }
    }

    YieldOnce { resumed: None }.await
}
