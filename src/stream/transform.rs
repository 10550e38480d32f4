//! Reusable stream transformations and piping into consumers.

use crate::deferred::{Deferred, Outcome};
use crate::error::{AsyncError, Failure, StackTrace, UsageError};
use crate::stream::controller::StreamController;
use crate::stream::sink::{EventSink, StreamConsumer};
use crate::stream::subscription::{StreamSubscription, Subscriber};
use crate::stream::{Stream, StreamSource};

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

/// Turns a stream of `S` into a stream of `T`.
///
/// Implemented for every `Fn(Stream<S>) -> Stream<T>`.
pub trait StreamTransformer<S, T> {
    fn bind(&self, stream: Stream<S>) -> Stream<T>;
}

impl<S, T, F> StreamTransformer<S, T> for F
where
    F: Fn(Stream<S>) -> Stream<T>,
{
    fn bind(&self, stream: Stream<S>) -> Stream<T> {
        self(stream)
    }
}

type DataHandler<S, T> = Rc<dyn Fn(S, &dyn EventSink<T>)>;
type ErrorHandler<T> = Rc<dyn Fn(Failure, &dyn EventSink<T>)>;
type DoneHandler<T> = Rc<dyn Fn(&dyn EventSink<T>)>;

/// A transformer built from per-event handlers writing into a sink.
///
/// Without an error handler errors pass through; without a done handler the sink is
/// closed when the input is done.
pub struct HandlerTransformer<S, T> {
    handle_data: DataHandler<S, T>,
    handle_error: Option<ErrorHandler<T>>,
    handle_done: Option<DoneHandler<T>>,
}

impl<S, T> Clone for HandlerTransformer<S, T> {
    fn clone(&self) -> Self {
        Self {
            handle_data: self.handle_data.clone(),
            handle_error: self.handle_error.clone(),
            handle_done: self.handle_done.clone(),
        }
    }
}

impl<S: Clone + 'static, T: Clone + 'static> HandlerTransformer<S, T> {
    pub fn new(handle_data: impl Fn(S, &dyn EventSink<T>) + 'static) -> Self {
        Self {
            handle_data: Rc::new(handle_data),
            handle_error: None,
            handle_done: None,
        }
    }

    pub fn on_error(mut self, handle_error: impl Fn(Failure, &dyn EventSink<T>) + 'static) -> Self {
        self.handle_error = Some(Rc::new(handle_error));
        self
    }

    pub fn on_done(mut self, handle_done: impl Fn(&dyn EventSink<T>) + 'static) -> Self {
        self.handle_done = Some(Rc::new(handle_done));
        self
    }
}

impl<S: Clone + 'static, T: Clone + 'static> StreamTransformer<S, T> for HandlerTransformer<S, T> {
    fn bind(&self, stream: Stream<S>) -> Stream<T> {
        Stream::from_source(Bound {
            source: stream,
            handlers: self.clone(),
        })
    }
}

struct Bound<S, T> {
    source: Stream<S>,
    handlers: HandlerTransformer<S, T>,
}

impl<S: Clone + 'static, T: Clone + 'static> StreamSource<T> for Bound<S, T> {
    fn listen(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        let controller: StreamController<T> = StreamController::sync();
        let upstream: Rc<RefCell<Option<StreamSubscription<S>>>> = Rc::new(RefCell::new(None));
        let refused: Rc<RefCell<Option<UsageError>>> = Rc::new(RefCell::new(None));

        controller.set_on_listen({
            let weak = controller.downgrade();
            let (source, handlers) = (self.source.clone(), self.handlers.clone());
            let (upstream, refused) = (upstream.clone(), refused.clone());
            move || {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                let sink = controller.sink();

                let subscriber = Subscriber::new()
                    .on_data({
                        let (handlers, sink) = (handlers.clone(), sink.clone());
                        move |value: S| (handlers.handle_data)(value, &sink)
                    })
                    .on_error_with_trace({
                        let (handlers, sink) = (handlers.clone(), sink.clone());
                        move |error: AsyncError, trace: StackTrace| match &handlers.handle_error {
                            Some(handle_error) => handle_error(Failure::new(error, trace), &sink),
                            None => {
                                if let Err(misuse) = sink.add_error(error, Some(trace)) {
                                    debug!(%misuse, "transformed stream error dropped");
                                }
                            }
                        }
                    })
                    .on_done({
                        let (handlers, sink) = (handlers.clone(), sink.clone());
                        move || match &handlers.handle_done {
                            Some(handle_done) => handle_done(&sink),
                            None => {
                                if let Err(misuse) = sink.close() {
                                    debug!(%misuse, "transformed stream already closed");
                                }
                            }
                        }
                    });

                match source.listen_with(subscriber) {
                    Ok(subscription) => *upstream.borrow_mut() = Some(subscription),
                    Err(misuse) => *refused.borrow_mut() = Some(misuse),
                }
            }
        });
        controller.set_on_pause({
            let upstream = upstream.clone();
            move || {
                let subscription = upstream.borrow().clone();
                if let Some(subscription) = subscription {
                    subscription.pause();
                }
            }
        });
        controller.set_on_resume({
            let upstream = upstream.clone();
            move || {
                let subscription = upstream.borrow().clone();
                if let Some(subscription) = subscription {
                    subscription.resume();
                }
            }
        });
        controller.set_on_cancel(move || {
            let subscription = upstream.borrow_mut().take();
            subscription.map(|subscription| subscription.cancel())
        });

        let downstream = controller.stream().listen_with(subscriber)?;
        let misuse = refused.borrow_mut().take();
        if let Some(misuse) = misuse {
            downstream.cancel();
            return Err(misuse);
        }
        Ok(downstream)
    }

    fn is_broadcast(&self) -> bool {
        self.source.is_broadcast()
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Applies a reusable transformation.
    pub fn transform<R>(&self, transformer: &impl StreamTransformer<T, R>) -> Stream<R> {
        transformer.bind(self.clone())
    }

    /// Feeds the whole stream into `consumer`, then closes it.
    ///
    /// The deferred settles with the consumer's close result, or with the first
    /// failure of either step.
    pub fn pipe(
        &self,
        consumer: &(impl StreamConsumer<T> + Clone + 'static),
    ) -> Result<Deferred<()>, UsageError> {
        let added = consumer.add_stream(self)?;
        let consumer = consumer.clone();

        let piped = added.register(
            move |()| match consumer.close() {
                Ok(closed) => Ok(Outcome::Chain(closed)),
                Err(misuse) => Err(AsyncError::from(misuse)),
            },
            None,
            None,
        );
        Ok(piped)
    }
}
