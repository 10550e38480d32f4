//! Lazy stream transformations.
//!
//! A transformed stream owns no events. Listening to it listens to the upstream
//! stream, and a [`Forwarder`] turns upstream events into downstream ones through an
//! [`Emitter`]. Pausing, resuming or canceling the downstream subscription is passed
//! to the upstream one.

use crate::deferred::{Deferred, ErrorTest};
use crate::error::{AsyncError, Failure, StackTrace, TimeoutError, UsageError};
use crate::stream::sink::EventSink;
use crate::stream::subscription::{Producer, StreamEvent, StreamSubscription, Subscriber};
use crate::stream::{Stream, StreamSource};
use crate::timer::Timer;
use crate::zone::Zone;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Per-listen transformation state.
pub(crate) trait Forwarder<S, T> {
    /// Called once, after the upstream subscription exists.
    fn start(&mut self, _out: &Emitter<S, T>) {}

    fn handle(&mut self, event: StreamEvent<S>, out: &Emitter<S, T>);
}

struct FnForwarder<F>(F);

impl<S, T, F> Forwarder<S, T> for FnForwarder<F>
where
    F: FnMut(StreamEvent<S>, &Emitter<S, T>),
{
    fn handle(&mut self, event: StreamEvent<S>, out: &Emitter<S, T>) {
        (self.0)(event, out)
    }
}

fn forwarder<S: 'static, T: 'static>(
    handle: impl FnMut(StreamEvent<S>, &Emitter<S, T>) + 'static,
) -> Box<dyn Forwarder<S, T>> {
    Box::new(FnForwarder(handle))
}

type Hook = Rc<dyn Fn()>;

// Shared between the emitter and the downstream subscription's producer slot.
struct Link<S, T> {
    upstream: RefCell<Option<StreamSubscription<S>>>,
    inner: RefCell<Option<StreamSubscription<T>>>,
    closed: Cell<bool>,
    on_pause: RefCell<Option<Hook>>,
    on_resume: RefCell<Option<Hook>>,
    on_cancel: RefCell<Option<Hook>>,
}

impl<S: 'static, T: 'static> Link<S, T> {
    fn new() -> Self {
        Self {
            upstream: RefCell::new(None),
            inner: RefCell::new(None),
            closed: Cell::new(false),
            on_pause: RefCell::new(None),
            on_resume: RefCell::new(None),
            on_cancel: RefCell::new(None),
        }
    }

    fn upstream(&self) -> Option<StreamSubscription<S>> {
        self.upstream.borrow().clone()
    }

    fn inner(&self) -> Option<StreamSubscription<T>> {
        self.inner.borrow().clone()
    }

    // Cancels everything feeding the downstream subscription.
    fn release(&self) -> Option<Deferred<()>> {
        self.closed.set(true);
        self.on_pause.borrow_mut().take();
        self.on_resume.borrow_mut().take();

        let on_cancel = self.on_cancel.borrow_mut().take();
        if let Some(on_cancel) = on_cancel {
            on_cancel();
        }

        let inner = self.inner.borrow_mut().take();
        if let Some(inner) = inner {
            inner.cancel();
        }

        let upstream = self.upstream.borrow_mut().take();
        upstream.map(|upstream| upstream.cancel())
    }
}

impl<S: 'static, T: 'static> Producer for Link<S, T> {
    fn pause(&self) {
        if let Some(upstream) = self.upstream() {
            upstream.pause();
        }
        if let Some(inner) = self.inner() {
            inner.pause();
        }
        let hook = self.on_pause.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn resume(&self) {
        if let Some(upstream) = self.upstream() {
            upstream.resume();
        }
        if let Some(inner) = self.inner() {
            inner.resume();
        }
        let hook = self.on_resume.borrow().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn cancel(&self) -> Option<Deferred<()>> {
        self.release()
    }
}

/// The forwarder's output: events for the downstream subscription, plus control over
/// the upstream one.
pub(crate) struct Emitter<S, T> {
    downstream: StreamSubscription<T>,
    link: Rc<Link<S, T>>,
}

impl<S, T> Clone for Emitter<S, T> {
    fn clone(&self) -> Self {
        Self {
            downstream: self.downstream.clone(),
            link: self.link.clone(),
        }
    }
}

impl<S: 'static, T: 'static> Emitter<S, T> {
    pub(crate) fn data(&self, value: T) {
        if !self.link.closed.get() {
            self.downstream.emit(StreamEvent::Data(value), true);
        }
    }

    pub(crate) fn error(&self, failure: Failure) {
        if !self.link.closed.get() {
            self.downstream.emit(StreamEvent::Error(failure), true);
        }
    }

    /// Sends the done event and cancels upstream.
    pub(crate) fn done(&self) {
        if self.link.closed.get() {
            return;
        }
        let _ = self.link.release();
        self.downstream.emit(StreamEvent::Done, true);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.link.closed.get()
    }

    pub(crate) fn pause_upstream(&self) {
        if let Some(upstream) = self.link.upstream() {
            upstream.pause();
        }
    }

    pub(crate) fn resume_upstream(&self) {
        if let Some(upstream) = self.link.upstream() {
            upstream.resume();
        }
    }

    /// Tracks a nested subscription so it follows the downstream pause state and is
    /// canceled with it.
    pub(crate) fn set_inner(&self, inner: Option<StreamSubscription<T>>) {
        let previous = std::mem::replace(&mut *self.link.inner.borrow_mut(), inner);
        drop(previous);
    }

    pub(crate) fn set_hooks(&self, on_pause: Hook, on_resume: Hook, on_cancel: Hook) {
        *self.link.on_pause.borrow_mut() = Some(on_pause);
        *self.link.on_resume.borrow_mut() = Some(on_resume);
        *self.link.on_cancel.borrow_mut() = Some(on_cancel);
    }
}

impl<S: 'static, T: 'static> EventSink<T> for Emitter<S, T> {
    fn add(&self, value: T) -> Result<(), UsageError> {
        if self.is_closed() {
            return Err(UsageError::Closed);
        }
        self.data(value);
        Ok(())
    }

    fn add_error(&self, error: AsyncError, trace: Option<StackTrace>) -> Result<(), UsageError> {
        if self.is_closed() {
            return Err(UsageError::Closed);
        }
        self.error(Failure::new(error, trace.unwrap_or_else(StackTrace::capture)));
        Ok(())
    }

    fn close(&self) -> Result<Deferred<()>, UsageError> {
        self.done();
        Ok(Deferred::value(()))
    }
}

enum Step<S> {
    Start,
    Event(StreamEvent<S>),
}

// Serializes forwarder calls: an event arriving while the forwarder runs (a sync
// upstream re-entered by the forwarder itself) is queued behind the current one.
struct Pump<S, T> {
    forwarder: RefCell<Box<dyn Forwarder<S, T>>>,
    backlog: RefCell<VecDeque<Step<S>>>,
}

impl<S, T> Pump<S, T> {
    fn feed(&self, step: Step<S>, out: &Emitter<S, T>) {
        self.backlog.borrow_mut().push_back(step);

        let Ok(mut forwarder) = self.forwarder.try_borrow_mut() else {
            return;
        };
        loop {
            let next = self.backlog.borrow_mut().pop_front();
            match next {
                Some(Step::Start) => forwarder.start(out),
                Some(Step::Event(event)) => forwarder.handle(event, out),
                None => break,
            }
        }
    }
}

type ForwarderFactory<S, T> = Rc<dyn Fn() -> Box<dyn Forwarder<S, T>>>;

struct Forward<S, T> {
    source: Stream<S>,
    factory: ForwarderFactory<S, T>,
}

impl<S: Clone + 'static, T: Clone + 'static> StreamSource<T> for Forward<S, T> {
    fn listen(&self, subscriber: Subscriber<T>) -> Result<StreamSubscription<T>, UsageError> {
        let downstream = StreamSubscription::new(Zone::current(), subscriber);
        let link = Rc::new(Link::new());
        let out = Emitter {
            downstream: downstream.clone(),
            link: link.clone(),
        };
        let pump = Rc::new(Pump {
            forwarder: RefCell::new((self.factory)()),
            backlog: RefCell::new(VecDeque::new()),
        });

        let upstream = self.source.listen_with(
            Subscriber::new()
                .on_data({
                    let (pump, out) = (pump.clone(), out.clone());
                    move |value: S| pump.feed(Step::Event(StreamEvent::Data(value)), &out)
                })
                .on_error_with_trace({
                    let (pump, out) = (pump.clone(), out.clone());
                    move |error: AsyncError, trace: StackTrace| {
                        let failure = Failure::new(error, trace);
                        pump.feed(Step::Event(StreamEvent::Error(failure)), &out)
                    }
                })
                .on_done({
                    let (pump, out) = (pump.clone(), out.clone());
                    move || pump.feed(Step::Event(StreamEvent::Done), &out)
                }),
        )?;

        *link.upstream.borrow_mut() = Some(upstream);
        downstream.set_producer(link);
        pump.feed(Step::Start, &out);
        Ok(downstream)
    }

    fn is_broadcast(&self) -> bool {
        self.source.is_broadcast()
    }
}

impl<T: Clone + 'static> Stream<T> {
    fn forward<R: Clone + 'static>(
        &self,
        factory: impl Fn() -> Box<dyn Forwarder<T, R>> + 'static,
    ) -> Stream<R> {
        Stream::from_source(Forward {
            source: self.clone(),
            factory: Rc::new(factory),
        })
    }

    /// Keeps the data events accepted by `test`.
    pub fn filter(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test = Rc::new(test);
        self.forward(move || {
            let test = test.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => {
                    if test(&value) {
                        out.data(value)
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    pub fn map<R: Clone + 'static>(&self, convert: impl Fn(T) -> R + 'static) -> Stream<R> {
        let convert = Rc::new(convert);
        self.forward(move || {
            let convert = convert.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, R>| match event {
                StreamEvent::Data(value) => out.data(convert(value)),
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Like [`map`](Self::map), but a failed conversion becomes an error event.
    pub fn try_map<R: Clone + 'static>(
        &self,
        convert: impl Fn(T) -> Result<R, AsyncError> + 'static,
    ) -> Stream<R> {
        let convert = Rc::new(convert);
        self.forward(move || {
            let convert = convert.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, R>| match event {
                StreamEvent::Data(value) => match convert(value) {
                    Ok(converted) => out.data(converted),
                    Err(error) => out.error(Failure::capture(error)),
                },
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Replaces each data event with the items `convert` returns for it.
    pub fn expand<R, I>(&self, convert: impl Fn(T) -> I + 'static) -> Stream<R>
    where
        R: Clone + 'static,
        I: IntoIterator<Item = R>,
    {
        let convert = Rc::new(convert);
        self.forward(move || {
            let convert = convert.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, R>| match event {
                StreamEvent::Data(value) => {
                    for item in convert(value) {
                        out.data(item);
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Intercepts error events accepted by `test` (default: all).
    ///
    /// `Ok(())` swallows the error. `Err` emits the returned error instead; returning
    /// the original error keeps its trace.
    pub fn handle_error(
        &self,
        handler: impl Fn(AsyncError, StackTrace) -> Result<(), AsyncError> + 'static,
        test: Option<ErrorTest>,
    ) -> Stream<T> {
        let handler = Rc::new(handler);
        let test: Option<Rc<dyn Fn(&AsyncError) -> bool>> = test.map(Rc::from);

        self.forward(move || {
            let (handler, test) = (handler.clone(), test.clone());
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => out.data(value),
                StreamEvent::Error(failure) => {
                    let matches = test.as_ref().is_none_or(|test| test(&failure.error));
                    if !matches {
                        out.error(failure);
                        return;
                    }

                    if let Err(error) = handler(failure.error.clone(), failure.trace.clone()) {
                        let trace = if error.ptr_eq(&failure.error) {
                            failure.trace
                        } else {
                            StackTrace::capture()
                        };
                        out.error(Failure::new(error, trace));
                    }
                }
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Maps each value through an asynchronous conversion, one at a time.
    ///
    /// Upstream is paused while a conversion is pending, so results keep the input
    /// order.
    pub fn async_map<R: Clone + 'static>(
        &self,
        convert: impl Fn(T) -> Deferred<R> + 'static,
    ) -> Stream<R> {
        let convert = Rc::new(convert);
        self.forward(move || {
            let convert = convert.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, R>| match event {
                StreamEvent::Data(value) => {
                    let pending = convert(value);
                    out.pause_upstream();

                    let out = out.clone();
                    pending.on_settled(move |result| {
                        match result {
                            Ok(converted) => out.data(converted),
                            Err(failure) => out.error(failure),
                        }
                        out.resume_upstream();
                    });
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Replaces each value with all events of the stream `convert` returns for it.
    ///
    /// Upstream is paused until that inner stream is done.
    pub fn async_expand<R: Clone + 'static>(
        &self,
        convert: impl Fn(T) -> Stream<R> + 'static,
    ) -> Stream<R> {
        let convert = Rc::new(convert);
        self.forward(move || {
            let convert = convert.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, R>| match event {
                StreamEvent::Data(value) => {
                    let inner = convert(value);
                    out.pause_upstream();

                    let listened = inner.listen_with(
                        Subscriber::new()
                            .on_data({
                                let out = out.clone();
                                move |item: R| out.data(item)
                            })
                            .on_error_with_trace({
                                let out = out.clone();
                                move |error: AsyncError, trace: StackTrace| {
                                    out.error(Failure::new(error, trace))
                                }
                            })
                            .on_done({
                                let out = out.clone();
                                move || {
                                    out.set_inner(None);
                                    out.resume_upstream();
                                }
                            }),
                    );

                    match listened {
                        Ok(subscription) => {
                            if !subscription.is_canceled() {
                                out.set_inner(Some(subscription));
                            }
                        }
                        Err(misuse) => {
                            out.error(Failure::capture(misuse));
                            out.resume_upstream();
                        }
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// The first `count` data events, then done. Upstream is canceled at that point.
    pub fn take(&self, count: usize) -> Stream<T> {
        self.forward(move || -> Box<dyn Forwarder<T, T>> { Box::new(Take { remaining: count }) })
    }

    /// Data events up to (excluding) the first one rejected by `test`.
    pub fn take_while(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test = Rc::new(test);
        self.forward(move || {
            let test = test.clone();
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => {
                    if test(&value) {
                        out.data(value)
                    } else {
                        out.done()
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Drops the first `count` data events. Errors are never dropped.
    pub fn skip(&self, count: usize) -> Stream<T> {
        self.forward(move || {
            let mut remaining = count;
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => {
                    if remaining > 0 {
                        remaining -= 1;
                    } else {
                        out.data(value)
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Drops data events while `test` accepts them, then passes everything on.
    pub fn skip_while(&self, test: impl Fn(&T) -> bool + 'static) -> Stream<T> {
        let test = Rc::new(test);
        self.forward(move || {
            let test = test.clone();
            let mut skipping = true;
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => {
                    if skipping && test(&value) {
                        return;
                    }
                    skipping = false;
                    out.data(value)
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Drops data events equal to the previous data event.
    pub fn distinct(&self) -> Stream<T>
    where
        T: PartialEq,
    {
        self.forward(|| {
            let mut previous: Option<T> = None;
            forwarder(move |event: StreamEvent<T>, out: &Emitter<T, T>| match event {
                StreamEvent::Data(value) => {
                    if previous.as_ref() != Some(&value) {
                        previous = Some(value.clone());
                        out.data(value);
                    }
                }
                StreamEvent::Error(failure) => out.error(failure),
                StreamEvent::Done => out.done(),
            })
        })
    }

    /// Emits a [`TimeoutError`] whenever `limit` passes without an event.
    ///
    /// The countdown restarts after each event and is suspended while paused.
    pub fn timeout(&self, limit: Duration) -> Stream<T> {
        self.forward(move || -> Box<dyn Forwarder<T, T>> { Box::new(Timeout::new(limit, None)) })
    }

    /// Calls `on_timeout` whenever `limit` passes without an event. It may add events
    /// or close the stream through the sink.
    pub fn timeout_with(
        &self,
        limit: Duration,
        on_timeout: impl Fn(&dyn EventSink<T>) + 'static,
    ) -> Stream<T> {
        let on_timeout: TimeoutHandler<T> = Rc::new(on_timeout);
        self.forward(move || -> Box<dyn Forwarder<T, T>> {
            Box::new(Timeout::new(limit, Some(on_timeout.clone())))
        })
    }
}

struct Take {
    remaining: usize,
}

impl<T: 'static> Forwarder<T, T> for Take {
    fn start(&mut self, out: &Emitter<T, T>) {
        if self.remaining == 0 {
            out.done();
        }
    }

    fn handle(&mut self, event: StreamEvent<T>, out: &Emitter<T, T>) {
        match event {
            StreamEvent::Data(value) => {
                if self.remaining == 0 {
                    return;
                }
                self.remaining -= 1;
                out.data(value);
                if self.remaining == 0 {
                    out.done();
                }
            }
            StreamEvent::Error(failure) => out.error(failure),
            StreamEvent::Done => out.done(),
        }
    }
}

type TimeoutHandler<T> = Rc<dyn Fn(&dyn EventSink<T>)>;

struct Timeout<T> {
    limit: Duration,
    on_timeout: Option<TimeoutHandler<T>>,
    zone: Zone,
    timer: Rc<RefCell<Option<Timer>>>,
}

impl<T: Clone + 'static> Timeout<T> {
    fn new(limit: Duration, on_timeout: Option<TimeoutHandler<T>>) -> Self {
        Self {
            limit,
            on_timeout,
            zone: Zone::current(),
            timer: Rc::new(RefCell::new(None)),
        }
    }

    fn countdown(&self) -> Countdown<T> {
        Countdown {
            limit: self.limit,
            on_timeout: self.on_timeout.clone(),
            zone: self.zone.clone(),
            timer: self.timer.clone(),
        }
    }
}

struct Countdown<T> {
    limit: Duration,
    on_timeout: Option<TimeoutHandler<T>>,
    zone: Zone,
    timer: Rc<RefCell<Option<Timer>>>,
}

impl<T: Clone + 'static> Clone for Countdown<T> {
    fn clone(&self) -> Self {
        Self {
            limit: self.limit,
            on_timeout: self.on_timeout.clone(),
            zone: self.zone.clone(),
            timer: self.timer.clone(),
        }
    }
}

impl<T: Clone + 'static> Countdown<T> {
    fn arm(&self, out: &Emitter<T, T>) {
        let countdown = self.clone();
        let out = out.clone();
        let timer = self.zone.create_timer(self.limit, move || {
            countdown.timer.borrow_mut().take();
            match &countdown.on_timeout {
                Some(on_timeout) => on_timeout(&out),
                None => out.error(Failure::capture(TimeoutError {
                    duration: countdown.limit,
                })),
            }
            if !out.is_closed() {
                countdown.arm(&out);
            }
        });

        let previous = self.timer.borrow_mut().replace(timer);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    fn disarm(&self) {
        let timer = self.timer.borrow_mut().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}

impl<T: Clone + 'static> Forwarder<T, T> for Timeout<T> {
    fn start(&mut self, out: &Emitter<T, T>) {
        let countdown = self.countdown();
        countdown.arm(out);

        let on_pause: Hook = Rc::new({
            let countdown = countdown.clone();
            move || countdown.disarm()
        });
        let on_resume: Hook = Rc::new({
            let (countdown, out) = (countdown.clone(), out.clone());
            move || countdown.arm(&out)
        });
        let on_cancel: Hook = Rc::new(move || countdown.disarm());
        out.set_hooks(on_pause, on_resume, on_cancel);
    }

    fn handle(&mut self, event: StreamEvent<T>, out: &Emitter<T, T>) {
        let countdown = self.countdown();
        countdown.disarm();

        match event {
            StreamEvent::Data(value) => out.data(value),
            StreamEvent::Error(failure) => out.error(failure),
            StreamEvent::Done => {
                out.done();
                return;
            }
        }
        if !out.is_closed() {
            countdown.arm(out);
        }
    }
}
