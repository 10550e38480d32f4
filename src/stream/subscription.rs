//! Per-listener delivery handle.
//!
//! Every listener of every stream gets one [`StreamSubscription`]. It owns the
//! listener's handlers and a queue of events waiting for delivery, and it talks back to
//! whatever produces its events through the [`Producer`] trait.
//!
//! Events arrive through [`StreamSubscription::emit`]:
//! - asynchronous emission queues the event and drains the queue one event per
//!   microtask,
//! - synchronous emission dispatches right away when nothing is queued and the
//!   subscription is not paused, and queues otherwise.
//!
//! While paused nothing is dispatched; on resume the queue drains in order before newer
//! events. Cancellation is terminal and drops whatever is still queued.

use crate::deferred::Deferred;
use crate::error::{AsyncError, Failure, StackTrace};
use crate::zone::Zone;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

/// One stream event.
#[derive(Clone, Debug)]
pub(crate) enum StreamEvent<T> {
    Data(T),
    Error(Failure),
    Done,
}

/// Error handler of a listener, taking the error alone or the error and its trace.
#[derive(Clone)]
pub enum StreamErrorHandler {
    Unary(Rc<dyn Fn(AsyncError)>),
    Binary(Rc<dyn Fn(AsyncError, StackTrace)>),
}

impl StreamErrorHandler {
    fn register(self, zone: &Zone) -> Self {
        match self {
            Self::Unary(f) => Self::Unary(zone.register_unary_callback(move |error: AsyncError| f(error))),
            Self::Binary(f) => Self::Binary(
                zone.register_binary_callback(move |error: AsyncError, trace: StackTrace| f(error, trace)),
            ),
        }
    }
}

/// The handlers a listener passes to [`Stream::listen_with`](crate::Stream::listen_with).
///
/// Without an error handler, error events are reported to the listening zone's
/// uncaught-error handler.
pub struct Subscriber<T> {
    on_data: Option<Rc<dyn Fn(T)>>,
    on_error: Option<StreamErrorHandler>,
    on_done: Option<Rc<dyn Fn()>>,
    cancel_on_error: bool,
}

impl<T: 'static> Subscriber<T> {
    pub fn new() -> Self {
        Self {
            on_data: None,
            on_error: None,
            on_done: None,
            cancel_on_error: false,
        }
    }

    pub fn on_data(mut self, handler: impl Fn(T) + 'static) -> Self {
        self.on_data = Some(Rc::new(handler));
        self
    }

    pub fn on_error(mut self, handler: impl Fn(AsyncError) + 'static) -> Self {
        self.on_error = Some(StreamErrorHandler::Unary(Rc::new(handler)));
        self
    }

    pub fn on_error_with_trace(mut self, handler: impl Fn(AsyncError, StackTrace) + 'static) -> Self {
        self.on_error = Some(StreamErrorHandler::Binary(Rc::new(handler)));
        self
    }

    pub fn on_done(mut self, handler: impl Fn() + 'static) -> Self {
        self.on_done = Some(Rc::new(handler));
        self
    }

    /// Cancel the subscription after delivering the first error.
    pub fn cancel_on_error(mut self, cancel: bool) -> Self {
        self.cancel_on_error = cancel;
        self
    }
}

impl<T: 'static> Default for Subscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The source side of a subscription: whatever feeds it events.
pub(crate) trait Producer {
    fn pause(&self) {}

    fn resume(&self) {}

    /// The listener canceled. The returned deferred settles once cleanup finished.
    fn cancel(&self) -> Option<Deferred<()>> {
        None
    }

    /// The done event was delivered.
    fn done(&self) {
        let _ = self.cancel();
    }
}

struct SubscriptionState<T> {
    on_data: Option<Rc<dyn Fn(T)>>,
    on_error: Option<StreamErrorHandler>,
    on_done: Option<Rc<dyn Fn()>>,
    cancel_on_error: bool,
    pause_count: usize,
    canceled: bool,
    pending: VecDeque<StreamEvent<T>>,
    drain_scheduled: bool,
    producer: Option<Rc<dyn Producer>>,
    cancel_result: Option<Deferred<()>>,
}

impl<T> SubscriptionState<T> {
    fn release_handlers(&mut self) {
        self.on_data = None;
        self.on_error = None;
        self.on_done = None;
        self.pending.clear();
    }
}

struct SubscriptionCore<T> {
    zone: Zone,
    state: RefCell<SubscriptionState<T>>,
}

/// A listener's handle on a stream: pause, resume, cancel, or swap handlers.
pub struct StreamSubscription<T>(Rc<SubscriptionCore<T>>);

impl<T> Clone for StreamSubscription<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> StreamSubscription<T> {
    /// Creates a subscription in `zone`, registering the handlers with it.
    pub(crate) fn new(zone: Zone, subscriber: Subscriber<T>) -> Self {
        let Subscriber {
            on_data,
            on_error,
            on_done,
            cancel_on_error,
        } = subscriber;

        let on_data = on_data.map(|f| zone.register_unary_callback(move |value: T| f(value)));
        let on_error = on_error.map(|handler| handler.register(&zone));
        let on_done = on_done.map(|f| zone.register_callback(move || f()));

        Self(Rc::new(SubscriptionCore {
            zone,
            state: RefCell::new(SubscriptionState {
                on_data,
                on_error,
                on_done,
                cancel_on_error,
                pause_count: 0,
                canceled: false,
                pending: VecDeque::new(),
                drain_scheduled: false,
                producer: None,
                cancel_result: None,
            }),
        }))
    }

    /// A subscription that only receives a done event.
    pub(crate) fn finished(zone: Zone, subscriber: Subscriber<T>) -> Self {
        let subscription = Self::new(zone, subscriber);
        subscription.emit(StreamEvent::Done, false);
        subscription
    }

    pub(crate) fn set_producer(&self, producer: Rc<dyn Producer>) {
        let canceled = {
            let mut state = self.0.state.borrow_mut();
            if !state.canceled {
                state.producer = Some(producer.clone());
            }
            state.canceled
        };

        if canceled {
            let _ = producer.cancel();
        }
    }

    /// Hands an event to the subscription. See the module docs for the sync/async rules.
    pub(crate) fn emit(&self, event: StreamEvent<T>, sync: bool) {
        let immediate = {
            let state = self.0.state.borrow();
            if state.canceled {
                return;
            }
            sync && state.pause_count == 0 && state.pending.is_empty()
        };

        if immediate {
            self.dispatch(event);
        } else {
            self.0.state.borrow_mut().pending.push_back(event);
            self.schedule_drain();
        }
    }

    fn schedule_drain(&self) {
        {
            let mut state = self.0.state.borrow_mut();
            if state.drain_scheduled
                || state.canceled
                || state.pause_count > 0
                || state.pending.is_empty()
            {
                return;
            }
            state.drain_scheduled = true;
        }

        let subscription = self.clone();
        self.0.zone.schedule_microtask(move || subscription.drain_one());
    }

    fn drain_one(&self) {
        let event = {
            let mut state = self.0.state.borrow_mut();
            state.drain_scheduled = false;
            if state.canceled || state.pause_count > 0 {
                return;
            }
            state.pending.pop_front()
        };

        if let Some(event) = event {
            self.dispatch(event);
        }
        self.schedule_drain();
    }

    fn dispatch(&self, event: StreamEvent<T>) {
        let zone = &self.0.zone;

        match event {
            StreamEvent::Data(value) => {
                let handler = {
                    let state = self.0.state.borrow();
                    if state.canceled {
                        return;
                    }
                    state.on_data.clone()
                };
                if let Some(handler) = handler {
                    zone.run_unary(|value| handler(value), value);
                }
            }
            StreamEvent::Error(failure) => {
                let (handler, cancel_on_error) = {
                    let state = self.0.state.borrow();
                    if state.canceled {
                        return;
                    }
                    (state.on_error.clone(), state.cancel_on_error)
                };

                match handler {
                    Some(StreamErrorHandler::Unary(handler)) => {
                        zone.run_unary(|error| handler(error), failure.error)
                    }
                    Some(StreamErrorHandler::Binary(handler)) => zone.run_binary(
                        |error, trace| handler(error, trace),
                        failure.error,
                        failure.trace,
                    ),
                    None => zone.handle_uncaught_error(failure),
                }

                if cancel_on_error {
                    let _ = self.cancel();
                }
            }
            StreamEvent::Done => {
                let (handler, producer) = {
                    let mut state = self.0.state.borrow_mut();
                    if state.canceled {
                        return;
                    }
                    state.canceled = true;
                    let handler = state.on_done.take();
                    state.release_handlers();
                    (handler, state.producer.take())
                };

                debug!("stream subscription done");
                if let Some(producer) = producer {
                    producer.done();
                }
                if let Some(handler) = handler {
                    zone.run(|| handler());
                }
            }
        }
    }

    /// Replaces the data handler.
    pub fn on_data(&self, handler: impl Fn(T) + 'static) {
        let handler = self.0.zone.register_unary_callback(handler);
        let previous = self.0.state.borrow_mut().on_data.replace(handler);
        drop(previous);
    }

    /// Replaces the error handler.
    pub fn on_error(&self, handler: impl Fn(AsyncError) + 'static) {
        let handler = StreamErrorHandler::Unary(Rc::new(handler)).register(&self.0.zone);
        let previous = self.0.state.borrow_mut().on_error.replace(handler);
        drop(previous);
    }

    pub fn on_error_with_trace(&self, handler: impl Fn(AsyncError, StackTrace) + 'static) {
        let handler = StreamErrorHandler::Binary(Rc::new(handler)).register(&self.0.zone);
        let previous = self.0.state.borrow_mut().on_error.replace(handler);
        drop(previous);
    }

    /// Replaces the done handler.
    pub fn on_done(&self, handler: impl Fn() + 'static) {
        let handler = self.0.zone.register_callback(handler);
        let previous = self.0.state.borrow_mut().on_done.replace(handler);
        drop(previous);
    }

    /// Pauses delivery. Pauses nest: each `pause` needs its own `resume`.
    pub fn pause(&self) {
        let producer = {
            let mut state = self.0.state.borrow_mut();
            if state.canceled {
                return;
            }
            state.pause_count += 1;
            if state.pause_count == 1 {
                state.producer.clone()
            } else {
                None
            }
        };

        if let Some(producer) = producer {
            producer.pause();
        }
    }

    /// Pauses until `signal` settles, whatever its outcome.
    pub fn pause_until(&self, signal: &Deferred<()>) {
        self.pause();
        let subscription = self.clone();
        signal.on_settled(move |_| subscription.resume());
    }

    /// Undoes one `pause`. Queued events drain once the last pause is undone.
    pub fn resume(&self) {
        let producer = {
            let mut state = self.0.state.borrow_mut();
            if state.canceled || state.pause_count == 0 {
                return;
            }
            state.pause_count -= 1;
            if state.pause_count == 0 {
                state.producer.clone()
            } else {
                None
            }
        };

        if let Some(producer) = producer {
            producer.resume();
        }
        self.schedule_drain();
    }

    /// Stops delivery for good and releases the producer.
    ///
    /// Idempotent. The returned deferred settles once the producer finished its cleanup.
    pub fn cancel(&self) -> Deferred<()> {
        let producer = {
            let mut state = self.0.state.borrow_mut();
            if state.canceled {
                return state
                    .cancel_result
                    .clone()
                    .unwrap_or_else(|| Deferred::value(()));
            }
            state.canceled = true;
            state.release_handlers();
            state.producer.take()
        };

        debug!("stream subscription canceled");
        let result = producer
            .and_then(|producer| producer.cancel())
            .unwrap_or_else(|| Deferred::value(()));

        self.0.state.borrow_mut().cancel_result = Some(result.clone());
        result
    }

    pub fn is_paused(&self) -> bool {
        self.0.state.borrow().pause_count > 0
    }

    pub fn is_canceled(&self) -> bool {
        self.0.state.borrow().canceled
    }

    /// Replaces the done and error handlers with ones settling a deferred: `value` on
    /// done, or the first error (after canceling).
    pub fn as_deferred<R: Clone + 'static>(&self, value: R) -> Deferred<R> {
        let result = Deferred::pending();

        let value = RefCell::new(Some(value));
        let on_done = {
            let result = result.clone();
            move || {
                let value = value.borrow_mut().take();
                if let Some(value) = value {
                    result.settle(Ok(value));
                }
            }
        };

        let on_error = {
            let result = result.clone();
            let subscription = self.clone();
            move |error: AsyncError, trace: StackTrace| {
                let result = result.clone();
                let failure = Failure::new(error, trace);
                subscription
                    .cancel()
                    .on_settled(move |_| result.settle(Err(failure)));
            }
        };

        self.on_done(on_done);
        self.on_error_with_trace(on_error);
        result
    }
}

impl<T> fmt::Debug for StreamSubscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.state.try_borrow() {
            Ok(state) => f
                .debug_struct("StreamSubscription")
                .field("pause_count", &state.pause_count)
                .field("canceled", &state.canceled)
                .field("pending", &state.pending.len())
                .finish(),
            Err(_) => f.write_str("StreamSubscription(busy)"),
        }
    }
}
