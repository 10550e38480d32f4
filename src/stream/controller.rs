//! Stream controllers: the producer side of a stream.
//!
//! A [`StreamController`] hands out a [`Stream`] and accepts events through `add`,
//! `add_error` and `close`. It comes in two flavours:
//!
//! - **Single-subscription** (the default): at most one listener. Events added before
//!   anybody listens are buffered and replayed to the listener, in order.
//! - **Broadcast**: any number of listeners, each receiving the events added while it
//!   listens. Nothing is buffered for absent listeners.
//!
//! A *sync* controller delivers an event during the `add` call when the listener can
//! take it; otherwise delivery waits for a later microtask.
//!
//! The `on_listen`, `on_pause`, `on_resume` and `on_cancel` callbacks let the producer
//! react to its listeners. Broadcast controllers only call `on_listen` for the first
//! listener and `on_cancel` when the last one leaves, and never call the pause
//! callbacks.

use crate::deferred::Deferred;
use crate::error::{AsyncError, Failure, StackTrace, UsageError};
use crate::stream::sink::{EventSink, StreamConsumer};
use crate::stream::subscription::{Producer, StreamEvent, StreamSubscription, Subscriber};
use crate::stream::{Stream, StreamSource};
use crate::zone::Zone;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::debug;

type CancelCallback = Rc<dyn Fn() -> Option<Deferred<()>>>;

#[derive(Clone, Default)]
struct Callbacks {
    on_listen: Option<Rc<dyn Fn()>>,
    on_pause: Option<Rc<dyn Fn()>>,
    on_resume: Option<Rc<dyn Fn()>>,
    on_cancel: Option<CancelCallback>,
}

enum Phase<T> {
    Idle,
    Listening(StreamSubscription<T>),
    Canceled,
    Finished,
}

enum Delivery<T> {
    Single {
        phase: Phase<T>,
        buffered: VecDeque<StreamEvent<T>>,
    },
    Broadcast {
        subscribers: Vec<(u64, StreamSubscription<T>)>,
    },
}

// An `add_stream` in progress.
struct Adding<T> {
    subscription: Option<StreamSubscription<T>>,
    finished: Deferred<()>,
}

struct ControllerState<T> {
    closed: bool,
    delivery: Delivery<T>,
    adding: Option<Adding<T>>,
    done_settled: bool,
    next_key: u64,
}

struct ControllerCore<T> {
    zone: Zone,
    sync: bool,
    broadcast: bool,
    state: RefCell<ControllerState<T>>,
    callbacks: RefCell<Callbacks>,
    done: Deferred<()>,
}

enum Admission<T> {
    Fresh(VecDeque<StreamEvent<T>>),
    Finished,
    Rejected,
}

/// Configures a [`StreamController`] before it is created.
pub struct ControllerBuilder<T> {
    sync: bool,
    broadcast: bool,
    callbacks: Callbacks,
    _marker: PhantomData<T>,
}

impl<T: Clone + 'static> ControllerBuilder<T> {
    pub fn new() -> Self {
        Self {
            sync: false,
            broadcast: false,
            callbacks: Callbacks::default(),
            _marker: PhantomData,
        }
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    pub fn on_listen(mut self, callback: impl Fn() + 'static) -> Self {
        self.callbacks.on_listen = Some(Rc::new(callback));
        self
    }

    pub fn on_pause(mut self, callback: impl Fn() + 'static) -> Self {
        self.callbacks.on_pause = Some(Rc::new(callback));
        self
    }

    pub fn on_resume(mut self, callback: impl Fn() + 'static) -> Self {
        self.callbacks.on_resume = Some(Rc::new(callback));
        self
    }

    pub fn on_cancel(mut self, callback: impl Fn() -> Option<Deferred<()>> + 'static) -> Self {
        self.callbacks.on_cancel = Some(Rc::new(callback));
        self
    }

    pub fn build(self) -> StreamController<T> {
        let delivery = if self.broadcast {
            Delivery::Broadcast {
                subscribers: Vec::new(),
            }
        } else {
            Delivery::Single {
                phase: Phase::Idle,
                buffered: VecDeque::new(),
            }
        };

        StreamController(Rc::new(ControllerCore {
            zone: Zone::current(),
            sync: self.sync,
            broadcast: self.broadcast,
            state: RefCell::new(ControllerState {
                closed: false,
                delivery,
                adding: None,
                done_settled: false,
                next_key: 0,
            }),
            callbacks: RefCell::new(self.callbacks),
            done: Deferred::pending(),
        }))
    }
}

impl<T: Clone + 'static> Default for ControllerBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The producer side of a [`Stream`].
pub struct StreamController<T>(Rc<ControllerCore<T>>);

impl<T> Clone for StreamController<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// A non-owning handle on a controller, for callbacks the controller itself keeps.
pub(crate) struct WeakController<T>(Weak<ControllerCore<T>>);

impl<T> WeakController<T> {
    pub(crate) fn upgrade(&self) -> Option<StreamController<T>> {
        self.0.upgrade().map(StreamController)
    }
}

impl<T> Clone for WeakController<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> StreamController<T> {
    /// An asynchronous single-subscription controller.
    pub fn new() -> Self {
        ControllerBuilder::new().build()
    }

    /// A synchronous single-subscription controller.
    pub fn sync() -> Self {
        ControllerBuilder::new().sync(true).build()
    }

    /// An asynchronous broadcast controller.
    pub fn broadcast() -> Self {
        ControllerBuilder::new().broadcast(true).build()
    }

    pub fn builder() -> ControllerBuilder<T> {
        ControllerBuilder::new()
    }

    pub(crate) fn downgrade(&self) -> WeakController<T> {
        WeakController(Rc::downgrade(&self.0))
    }

    /// The stream fed by this controller.
    pub fn stream(&self) -> Stream<T> {
        Stream::from_source(ControllerSource(self.clone()))
    }

    /// A handle exposing only the [`EventSink`] side.
    pub fn sink(&self) -> ControllerSink<T> {
        ControllerSink(self.clone())
    }

    /// Settles once the controller is closed and its listeners are gone, or once the
    /// single listener canceled.
    pub fn done(&self) -> Deferred<()> {
        self.0.done.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.state.borrow().closed
    }

    pub fn is_broadcast(&self) -> bool {
        self.0.broadcast
    }

    /// True while the single listener is paused, and before anybody listened.
    /// Always false for broadcast controllers.
    pub fn is_paused(&self) -> bool {
        match &self.0.state.borrow().delivery {
            Delivery::Single {
                phase: Phase::Listening(subscription),
                ..
            } => subscription.is_paused(),
            Delivery::Single {
                phase: Phase::Idle, ..
            } => true,
            Delivery::Single { .. } | Delivery::Broadcast { .. } => false,
        }
    }

    pub fn has_listener(&self) -> bool {
        match &self.0.state.borrow().delivery {
            Delivery::Single { phase, .. } => matches!(phase, Phase::Listening(_)),
            Delivery::Broadcast { subscribers } => !subscribers.is_empty(),
        }
    }

    pub fn set_on_listen(&self, callback: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_listen = Some(Rc::new(callback));
    }

    pub fn set_on_pause(&self, callback: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_pause = Some(Rc::new(callback));
    }

    pub fn set_on_resume(&self, callback: impl Fn() + 'static) {
        self.0.callbacks.borrow_mut().on_resume = Some(Rc::new(callback));
    }

    pub fn set_on_cancel(&self, callback: impl Fn() -> Option<Deferred<()>> + 'static) {
        self.0.callbacks.borrow_mut().on_cancel = Some(Rc::new(callback));
    }

    /// Sends a data event.
    ///
    /// # Errors
    /// [`UsageError::Closed`] after `close`, [`UsageError::AddingStream`] while an
    /// `add_stream` is in progress.
    pub fn add(&self, value: T) -> Result<(), UsageError> {
        self.check_writable()?;
        self.push(StreamEvent::Data(value));
        Ok(())
    }

    /// Sends an error event, after offering it to the current zone's error callback.
    pub fn add_error(
        &self,
        error: impl Into<AsyncError>,
        trace: Option<StackTrace>,
    ) -> Result<(), UsageError> {
        self.check_writable()?;

        let failure = Failure::new(error.into(), trace.unwrap_or_else(StackTrace::capture));
        let failure = Zone::current().error_callback(&failure).unwrap_or(failure);
        self.push(StreamEvent::Error(failure));
        Ok(())
    }

    /// Sends the done event and refuses further events.
    ///
    /// Closing twice returns the same `done` deferred.
    pub fn close(&self) -> Result<Deferred<()>, UsageError> {
        {
            let mut state = self.0.state.borrow_mut();
            if state.closed {
                return Ok(self.0.done.clone());
            }
            if state.adding.is_some() {
                return Err(UsageError::AddingStream);
            }
            state.closed = true;
        }

        debug!(broadcast = self.0.broadcast, "stream controller closed");
        self.push(StreamEvent::Done);

        if self.0.broadcast && !self.has_listener() {
            self.settle_done();
        }
        Ok(self.0.done.clone())
    }

    /// Forwards every event of `source` until it is done.
    ///
    /// While the returned deferred is pending, `add`, `add_error` and `close` are
    /// refused. Pausing the listener pauses `source`, and canceling it cancels `source`.
    pub fn add_stream(
        &self,
        source: &Stream<T>,
        cancel_on_error: bool,
    ) -> Result<Deferred<()>, UsageError> {
        self.check_writable()?;

        let finished = Deferred::pending();
        self.0.state.borrow_mut().adding = Some(Adding {
            subscription: None,
            finished: finished.clone(),
        });

        let subscriber = Subscriber::new()
            .on_data({
                let controller = self.clone();
                move |value: T| controller.push(StreamEvent::Data(value))
            })
            .on_error_with_trace({
                let controller = self.clone();
                move |error: AsyncError, trace: StackTrace| {
                    controller.push(StreamEvent::Error(Failure::new(error, trace)));
                    if cancel_on_error {
                        controller.finish_adding();
                    }
                }
            })
            .on_done({
                let controller = self.clone();
                move || controller.finish_adding()
            })
            .cancel_on_error(cancel_on_error);

        match source.listen_with(subscriber) {
            Ok(subscription) => {
                let paused = self.has_listener() && self.is_paused();
                if let Some(adding) = self.0.state.borrow_mut().adding.as_mut() {
                    adding.subscription = Some(subscription.clone());
                }
                if paused {
                    subscription.pause();
                }
                Ok(finished)
            }
            Err(misuse) => {
                self.0.state.borrow_mut().adding = None;
                Err(misuse)
            }
        }
    }

    fn check_writable(&self) -> Result<(), UsageError> {
        let state = self.0.state.borrow();
        if state.closed {
            Err(UsageError::Closed)
        } else if state.adding.is_some() {
            Err(UsageError::AddingStream)
        } else {
            Ok(())
        }
    }

    fn finish_adding(&self) {
        let adding = self.0.state.borrow_mut().adding.take();
        if let Some(adding) = adding {
            adding.finished.settle(Ok(()));
        }
    }

    /// Routes an event to the listeners, or buffers it. Performs no writability checks.
    pub(crate) fn push(&self, event: StreamEvent<T>) {
        enum Targets<T> {
            One(StreamSubscription<T>),
            Many(Vec<StreamSubscription<T>>),
            Nobody,
        }

        let targets = {
            let mut guard = self.0.state.borrow_mut();
            match &mut guard.delivery {
                Delivery::Single {
                    phase: Phase::Listening(subscription),
                    ..
                } => Targets::One(subscription.clone()),
                Delivery::Single {
                    phase: Phase::Idle,
                    buffered,
                } => {
                    buffered.push_back(event);
                    return;
                }
                Delivery::Single { .. } => return,
                Delivery::Broadcast { subscribers } if subscribers.is_empty() => Targets::Nobody,
                Delivery::Broadcast { subscribers } => Targets::Many(
                    subscribers
                        .iter()
                        .map(|(_, subscription)| subscription.clone())
                        .collect(),
                ),
            }
        };

        match targets {
            Targets::One(subscription) => subscription.emit(event, self.0.sync),
            Targets::Many(subscriptions) => {
                for subscription in subscriptions {
                    subscription.emit(event.clone(), self.0.sync);
                }
            }
            Targets::Nobody => {
                if let StreamEvent::Error(failure) = event {
                    self.0.zone.handle_uncaught_error(failure);
                }
            }
        }
    }

    fn subscribe(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        let zone = Zone::current();
        if self.0.broadcast {
            return Ok(self.subscribe_broadcast(zone, subscriber));
        }

        let admission = {
            let mut guard = self.0.state.borrow_mut();
            match &mut guard.delivery {
                Delivery::Single { phase, buffered } => match phase {
                    Phase::Idle => Admission::Fresh(std::mem::take(buffered)),
                    Phase::Finished => Admission::Finished,
                    Phase::Listening(_) | Phase::Canceled => Admission::Rejected,
                },
                Delivery::Broadcast { .. } => Admission::Rejected,
            }
        };

        match admission {
            Admission::Rejected => Err(UsageError::AlreadyListened),
            Admission::Finished => Ok(StreamSubscription::finished(zone, subscriber)),
            Admission::Fresh(buffered) => {
                let subscription = StreamSubscription::new(zone, subscriber);
                subscription.set_producer(Rc::new(SingleLink {
                    controller: self.clone(),
                }));

                if let Delivery::Single { phase, .. } = &mut self.0.state.borrow_mut().delivery {
                    *phase = Phase::Listening(subscription.clone());
                }
                debug!(buffered = buffered.len(), "single-subscription stream listened");

                for event in buffered {
                    subscription.emit(event, false);
                }
                self.run_callback(|callbacks| callbacks.on_listen.clone());
                Ok(subscription)
            }
        }
    }

    fn subscribe_broadcast(&self, zone: Zone, subscriber: Subscriber<T>) -> StreamSubscription<T> {
        if self.is_closed() {
            return StreamSubscription::finished(zone, subscriber);
        }

        let subscription = StreamSubscription::new(zone, subscriber);
        let first = {
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;
            let key = state.next_key;
            state.next_key += 1;

            subscription.set_producer(Rc::new(BroadcastLink {
                controller: self.clone(),
                key,
            }));

            match &mut state.delivery {
                Delivery::Broadcast { subscribers } => {
                    subscribers.push((key, subscription.clone()));
                    subscribers.len() == 1
                }
                Delivery::Single { .. } => false,
            }
        };

        if first {
            debug!("broadcast stream got its first listener");
            self.run_callback(|callbacks| callbacks.on_listen.clone());
        }
        subscription
    }

    fn run_callback(&self, pick: fn(&Callbacks) -> Option<Rc<dyn Fn()>>) {
        let callback = pick(&self.0.callbacks.borrow());
        if let Some(callback) = callback {
            callback();
        }
    }

    fn run_cancel_callback(&self) -> Option<Deferred<()>> {
        let callback = self.0.callbacks.borrow().on_cancel.clone();
        callback.and_then(|callback| callback())
    }

    fn settle_done(&self) {
        let first = {
            let mut state = self.0.state.borrow_mut();
            !std::mem::replace(&mut state.done_settled, true)
        };

        if first {
            let done = self.0.done.clone();
            self.0.zone.schedule_microtask(move || done.settle(Ok(())));
        }
    }

    fn forward_to_added(&self, action: fn(&StreamSubscription<T>)) {
        let added = self
            .0
            .state
            .borrow()
            .adding
            .as_ref()
            .and_then(|adding| adding.subscription.clone());

        if let Some(added) = added {
            action(&added);
        }
    }

    // The single listener went away, by canceling or after the done event.
    fn detach_single(&self, finished: bool) -> Option<Deferred<()>> {
        let adding = {
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;
            if let Delivery::Single { phase, buffered } = &mut state.delivery {
                *phase = if finished {
                    Phase::Finished
                } else {
                    Phase::Canceled
                };
                buffered.clear();
            }
            state.adding.take()
        };

        let source_canceled = adding.map(|adding| {
            let canceled = match adding.subscription {
                Some(subscription) => subscription.cancel(),
                None => Deferred::value(()),
            };
            let finished = adding.finished;
            canceled.on_settled(move |_| finished.settle(Ok(())));
            canceled
        });

        let canceled = self.run_cancel_callback();
        self.settle_done();
        canceled.or(source_canceled)
    }

    fn detach_broadcast(&self, key: u64) -> Option<Deferred<()>> {
        let (emptied, closed) = {
            let mut guard = self.0.state.borrow_mut();
            let state = &mut *guard;
            let emptied = match &mut state.delivery {
                Delivery::Broadcast { subscribers } => {
                    let before = subscribers.len();
                    subscribers.retain(|(candidate, _)| *candidate != key);
                    before != subscribers.len() && subscribers.is_empty()
                }
                Delivery::Single { .. } => false,
            };
            (emptied, state.closed)
        };

        if !emptied {
            return None;
        }

        debug!("broadcast stream lost its last listener");
        let canceled = self.run_cancel_callback();
        if closed {
            self.settle_done();
        }
        canceled
    }
}

impl<T: Clone + 'static> Default for StreamController<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> EventSink<T> for StreamController<T> {
    fn add(&self, value: T) -> Result<(), UsageError> {
        StreamController::add(self, value)
    }

    fn add_error(&self, error: AsyncError, trace: Option<StackTrace>) -> Result<(), UsageError> {
        StreamController::add_error(self, error, trace)
    }

    fn close(&self) -> Result<Deferred<()>, UsageError> {
        StreamController::close(self)
    }
}

impl<T: Clone + 'static> StreamConsumer<T> for StreamController<T> {
    fn add_stream(&self, stream: &Stream<T>) -> Result<Deferred<()>, UsageError> {
        StreamController::add_stream(self, stream, false)
    }

    fn close(&self) -> Result<Deferred<()>, UsageError> {
        StreamController::close(self)
    }
}

impl<T> fmt::Debug for StreamController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamController")
            .field("sync", &self.0.sync)
            .field("broadcast", &self.0.broadcast)
            .finish_non_exhaustive()
    }
}

/// The write-only face of a [`StreamController`].
pub struct ControllerSink<T>(StreamController<T>);

impl<T> Clone for ControllerSink<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + 'static> ControllerSink<T> {
    /// Settles like [`StreamController::done`].
    pub fn done(&self) -> Deferred<()> {
        self.0.done()
    }

    pub fn close(&self) -> Result<Deferred<()>, UsageError> {
        self.0.close()
    }
}

impl<T: Clone + 'static> EventSink<T> for ControllerSink<T> {
    fn add(&self, value: T) -> Result<(), UsageError> {
        self.0.add(value)
    }

    fn add_error(&self, error: AsyncError, trace: Option<StackTrace>) -> Result<(), UsageError> {
        self.0.add_error(error, trace)
    }

    fn close(&self) -> Result<Deferred<()>, UsageError> {
        ControllerSink::close(self)
    }
}

impl<T: Clone + 'static> StreamConsumer<T> for ControllerSink<T> {
    fn add_stream(&self, stream: &Stream<T>) -> Result<Deferred<()>, UsageError> {
        self.0.add_stream(stream, false)
    }

    fn close(&self) -> Result<Deferred<()>, UsageError> {
        ControllerSink::close(self)
    }
}

struct ControllerSource<T>(StreamController<T>);

impl<T: Clone + 'static> StreamSource<T> for ControllerSource<T> {
    fn listen(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        self.0.subscribe(subscriber)
    }

    fn is_broadcast(&self) -> bool {
        self.0.is_broadcast()
    }
}

struct SingleLink<T: Clone + 'static> {
    controller: StreamController<T>,
}

impl<T: Clone + 'static> Producer for SingleLink<T> {
    fn pause(&self) {
        self.controller.forward_to_added(StreamSubscription::pause);
        self.controller
            .run_callback(|callbacks| callbacks.on_pause.clone());
    }

    fn resume(&self) {
        self.controller.forward_to_added(StreamSubscription::resume);
        self.controller
            .run_callback(|callbacks| callbacks.on_resume.clone());
    }

    fn cancel(&self) -> Option<Deferred<()>> {
        self.controller.detach_single(false)
    }

    fn done(&self) {
        let _ = self.controller.detach_single(true);
    }
}

struct BroadcastLink<T: Clone + 'static> {
    controller: StreamController<T>,
    key: u64,
}

impl<T: Clone + 'static> Producer for BroadcastLink<T> {
    fn cancel(&self) -> Option<Deferred<()>> {
        self.controller.detach_broadcast(self.key)
    }
}
