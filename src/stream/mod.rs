//! Asynchronous event sequences.
//!
//! A [`Stream`] delivers any number of data and error events followed by at most one
//! done event. Listening yields a [`StreamSubscription`], the listener's handle for
//! pausing, resuming and canceling delivery.
//!
//! Streams are produced by a [`StreamController`], by the constructors on `Stream`, or
//! by transforming another stream. Transformations are lazy: they subscribe upstream
//! when the transformed stream is listened to, and forward pause, resume and cancel
//! requests upstream.
//!
//! ```ignore
//! use ripple::{Runtime, Stream};
//!
//! let mut runtime = Runtime::new();
//! let sum = runtime.block_on(Stream::from_iter(1..=4).map(|n| n * 10).fold(0, |a, b| a + b).unwrap());
//! assert_eq!(sum.unwrap(), 100);
//! ```

pub(crate) mod controller;
mod forwarding;
mod reduce;
pub(crate) mod sink;
pub(crate) mod subscription;
mod transform;

pub use controller::{ControllerBuilder, ControllerSink, StreamController};
pub use sink::{EventSink, StreamConsumer};
pub use subscription::{StreamErrorHandler, StreamSubscription, Subscriber};
pub use transform::{HandlerTransformer, StreamTransformer};

use crate::deferred::Deferred;
use crate::error::{AsyncError, Failure, UsageError};
use crate::timer::Timer;
use crate::zone::Zone;

use subscription::StreamEvent;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Where a stream's subscriptions come from.
pub(crate) trait StreamSource<T> {
    fn listen(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError>;

    fn is_broadcast(&self) -> bool;
}

/// A sequence of asynchronous events.
///
/// Cloning a stream clones the handle, not the events: a single-subscription stream
/// still accepts only one listener across all its clones.
pub struct Stream<T> {
    source: Rc<dyn StreamSource<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: Clone + 'static> Stream<T> {
    pub(crate) fn from_source(source: impl StreamSource<T> + 'static) -> Self {
        Self {
            source: Rc::new(source),
        }
    }

    /// Listens with only a data handler.
    ///
    /// # Errors
    /// [`UsageError::AlreadyListened`] for a single-subscription stream that already
    /// has (or had) a listener.
    pub fn listen(&self, on_data: impl Fn(T) + 'static) -> Result<StreamSubscription<T>, UsageError> {
        self.listen_with(Subscriber::new().on_data(on_data))
    }

    /// Listens with a full set of handlers.
    pub fn listen_with(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        self.source.listen(subscriber)
    }

    /// Whether the stream accepts more than one listener.
    pub fn is_broadcast(&self) -> bool {
        self.source.is_broadcast()
    }

    /// A broadcast stream that is done as soon as it is listened to.
    pub fn empty() -> Self {
        Self::from_source(Empty)
    }

    /// A stream with one data event.
    pub fn value(value: T) -> Self {
        Self::seeded(vec![StreamEvent::Data(value)])
    }

    /// A stream with one error event.
    pub fn error(error: impl Into<AsyncError>) -> Self {
        Self::seeded(vec![StreamEvent::Error(Failure::capture(error))])
    }

    /// A stream of the items of `items`, in order.
    pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self {
        Self::seeded(items.into_iter().map(StreamEvent::Data).collect())
    }

    fn seeded(events: Vec<StreamEvent<T>>) -> Self {
        let controller = StreamController::new();
        for event in events {
            controller.push(event);
        }
        controller.push(StreamEvent::Done);
        controller.stream()
    }

    /// A stream with the outcome of `deferred` as its only event.
    pub fn from_deferred(deferred: &Deferred<T>) -> Self {
        let controller = StreamController::sync();
        let sink = controller.clone();
        deferred.on_settled(move |result| {
            match result {
                Ok(value) => sink.push(StreamEvent::Data(value)),
                Err(failure) => sink.push(StreamEvent::Error(failure)),
            }
            sink.push(StreamEvent::Done);
        });
        controller.stream()
    }

    /// A stream with the outcome of each deferred, in settlement order. Done once all
    /// of them settled.
    pub fn from_deferreds(deferreds: Vec<Deferred<T>>) -> Self {
        if deferreds.is_empty() {
            return Self::seeded(Vec::new());
        }

        let controller = StreamController::sync();
        let remaining = Rc::new(Cell::new(deferreds.len()));
        for deferred in deferreds {
            let sink = controller.clone();
            let remaining = remaining.clone();
            deferred.on_settled(move |result| {
                match result {
                    Ok(value) => sink.push(StreamEvent::Data(value)),
                    Err(failure) => sink.push(StreamEvent::Error(failure)),
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    sink.push(StreamEvent::Done);
                }
            });
        }
        controller.stream()
    }

    /// Emits `compute(0)`, `compute(1)`, ... once per `period`.
    ///
    /// The timer runs only while the stream is listened to and not paused. It never
    /// ends on its own.
    pub fn periodic(period: Duration, compute: impl Fn(u64) -> T + 'static) -> Self {
        let controller = StreamController::sync();
        let ticker = Rc::new(Ticker {
            period,
            count: Cell::new(0),
            timer: RefCell::new(None),
            compute: Box::new(compute),
            controller: controller.downgrade(),
        });

        controller.set_on_listen({
            let ticker = ticker.clone();
            move || ticker.start()
        });
        controller.set_on_pause({
            let ticker = ticker.clone();
            move || ticker.stop()
        });
        controller.set_on_resume({
            let ticker = ticker.clone();
            move || ticker.start()
        });
        controller.set_on_cancel(move || {
            ticker.stop();
            None
        });
        controller.stream()
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// A stream with this deferred's outcome as its only event.
    pub fn as_stream(&self) -> Stream<T> {
        Stream::from_deferred(self)
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("broadcast", &self.source.is_broadcast())
            .finish()
    }
}

struct Empty;

impl<T: 'static> StreamSource<T> for Empty {
    fn listen(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        Ok(StreamSubscription::finished(Zone::current(), subscriber))
    }

    fn is_broadcast(&self) -> bool {
        true
    }
}

struct Ticker<T> {
    period: Duration,
    count: Cell<u64>,
    timer: RefCell<Option<Timer>>,
    compute: Box<dyn Fn(u64) -> T>,
    controller: controller::WeakController<T>,
}

impl<T: Clone + 'static> Ticker<T> {
    fn start(self: &Rc<Self>) {
        let ticker = Rc::downgrade(self);
        let timer = Zone::current().create_periodic_timer(self.period, move |_: &Timer| {
            let Some(ticker) = ticker.upgrade() else {
                return;
            };
            let Some(controller) = ticker.controller.upgrade() else {
                return;
            };

            let tick = ticker.count.get();
            ticker.count.set(tick + 1);
            controller.push(StreamEvent::Data((ticker.compute)(tick)));
        });

        let previous = self.timer.borrow_mut().replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn stop(&self) {
        let timer = self.timer.borrow_mut().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}
