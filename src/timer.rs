//! Timers for the event loop.
//!
//! The [`TimerDriver`] keeps every armed timer of this thread in a min-heap ordered by
//! deadline. The runtime's loop asks it for the next expired entry and for the time
//! remaining until the next deadline, so nothing is ever polled busily.
//!
//! [`Timer`] is the public, cancellable handle. Timers are created through a zone
//! ([`Zone::create_timer`](crate::Zone::create_timer)) so zone hooks can intercept them.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

// Thread-local timer driver, paired with the thread-local microtask queue.
thread_local! {
    static TIMER_DRIVER: RefCell<TimerDriver> = RefCell::new(TimerDriver::new());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TimerId(u64);

type PeriodicCallback = Rc<RefCell<Box<dyn FnMut()>>>;

enum TimerCallback {
    Once(Box<dyn FnOnce()>),
    Periodic {
        period: Duration,
        callback: PeriodicCallback,
    },
}

struct TimerEntry {
    deadline: Instant,
    callback: TimerCallback,
}

/// A timer whose deadline has passed, detached from the driver so it can run without
/// the driver being borrowed.
pub(crate) enum Expired {
    Once(Box<dyn FnOnce()>),
    Periodic(PeriodicCallback),
}

impl Expired {
    pub(crate) fn fire(self) {
        match self {
            Expired::Once(callback) => callback(),
            Expired::Periodic(callback) => {
                let mut callback = callback.borrow_mut();
                (*callback)()
            }
        }
    }
}

/// Manages armed timers and hands out the ones whose deadline is reached.
///
/// Canceled or rescheduled entries leave stale heap nodes behind; those are skipped
/// lazily by comparing against the live entry's deadline.
pub(crate) struct TimerDriver {
    entries: HashMap<TimerId, TimerEntry>,
    deadlines: BinaryHeap<Reverse<(Instant, TimerId)>>,
    next_id: u64,
}

impl TimerDriver {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_id: 0,
        }
    }

    fn arm(&mut self, id: TimerId, deadline: Instant, callback: TimerCallback) {
        self.deadlines.push(Reverse((deadline, id)));
        self.entries.insert(id, TimerEntry { deadline, callback });
    }

    fn next_id(&mut self) -> TimerId {
        self.next_id += 1;
        TimerId(self.next_id)
    }

    /// Registers a one-shot timer firing `delay` from now.
    pub(crate) fn register_once(&mut self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let id = self.next_id();
        self.arm(id, Instant::now() + delay, TimerCallback::Once(callback));
        id
    }

    /// Registers a timer firing every `period`, starting one period from now.
    pub(crate) fn register_periodic(&mut self, period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
        let id = self.next_id();
        let callback = Rc::new(RefCell::new(callback));
        self.arm(id, Instant::now() + period, TimerCallback::Periodic { period, callback });
        id
    }

    /// Disarms a timer. Returns false if it already fired or was canceled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    // Drops heap nodes that no longer match a live entry.
    fn discard_stale(&mut self) {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            let live = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.deadline == deadline);

            if live {
                break;
            }
            self.deadlines.pop();
        }
    }

    /// Detaches the earliest timer whose deadline is at or before `now`.
    ///
    /// A periodic timer is re-armed one period after its previous deadline (or at `now`
    /// if the loop fell behind) before it is handed out.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Option<Expired> {
        self.discard_stale();

        let Reverse((deadline, id)) = self.deadlines.peek().copied()?;
        if deadline > now {
            return None;
        }

        self.deadlines.pop();
        let entry = self.entries.remove(&id)?;

        match entry.callback {
            TimerCallback::Once(callback) => Some(Expired::Once(callback)),
            TimerCallback::Periodic { period, callback } => {
                let next = (deadline + period).max(now);
                let expired = Expired::Periodic(callback.clone());
                self.arm(id, next, TimerCallback::Periodic { period, callback });
                Some(expired)
            }
        }
    }

    /// Returns the time remaining until the next deadline, if any timer is armed.
    pub(crate) fn next_remaining(&mut self) -> Option<Duration> {
        self.discard_stale();

        let Reverse((deadline, _)) = self.deadlines.peek()?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

/// Arms a one-shot timer on this thread's driver.
pub(crate) fn schedule_timer(delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
    let id = TIMER_DRIVER.with(|driver| driver.borrow_mut().register_once(delay, callback));
    trace!(?id, ?delay, "timer scheduled");
    id
}

/// Arms a periodic timer on this thread's driver.
pub(crate) fn schedule_periodic(period: Duration, callback: Box<dyn FnMut()>) -> TimerId {
    let id = TIMER_DRIVER.with(|driver| driver.borrow_mut().register_periodic(period, callback));
    trace!(?id, ?period, "periodic timer scheduled");
    id
}

pub(crate) fn cancel_timer(id: TimerId) -> bool {
    TIMER_DRIVER.with(|driver| driver.borrow_mut().cancel(id))
}

/// Detaches the next expired timer, if any. The driver is not borrowed while it fires.
pub(crate) fn pop_expired_timer() -> Option<Expired> {
    TIMER_DRIVER.with(|driver| driver.borrow_mut().pop_expired(Instant::now()))
}

pub(crate) fn next_timer_remaining() -> Option<Duration> {
    TIMER_DRIVER.with(|driver| driver.borrow_mut().next_remaining())
}

struct TimerState {
    id: Cell<Option<TimerId>>,
    period: Option<Duration>,
    started: Instant,
    tick: Cell<u64>,
}

/// Handle to a one-shot or periodic timer.
///
/// A one-shot timer is inactive once it fired; any timer is inactive after
/// [`cancel`](Timer::cancel). Cloning the handle does not duplicate the timer.
#[derive(Clone)]
pub struct Timer(Rc<TimerState>);

impl Timer {
    fn with_period(period: Option<Duration>) -> Self {
        Self(Rc::new(TimerState {
            id: Cell::new(None),
            period,
            started: Instant::now(),
            tick: Cell::new(0),
        }))
    }

    /// A handle that was never armed. Useful for `create_timer` hooks that swallow timers.
    pub fn inactive() -> Self {
        Self::with_period(None)
    }

    pub(crate) fn one_shot(delay: Duration, callback: Box<dyn FnOnce()>) -> Self {
        let timer = Self::with_period(None);
        let handle = timer.clone();

        let id = schedule_timer(
            delay,
            Box::new(move || {
                handle.0.id.set(None);
                handle.0.tick.set(1);
                callback();
            }),
        );

        timer.0.id.set(Some(id));
        timer
    }

    pub(crate) fn periodic(period: Duration, mut callback: Box<dyn FnMut(&Timer)>) -> Self {
        let timer = Self::with_period(Some(period));
        let handle = timer.clone();

        let id = schedule_periodic(
            period,
            Box::new(move || {
                handle.advance_tick();
                callback(&handle);
            }),
        );

        timer.0.id.set(Some(id));
        timer
    }

    // Counts whole periods elapsed since the timer started, never less than one more
    // than the previous tick.
    fn advance_tick(&self) {
        let previous = self.0.tick.get();
        let elapsed = match self.0.period {
            Some(period) if !period.is_zero() => {
                (self.0.started.elapsed().as_nanos() / period.as_nanos()) as u64
            }
            _ => 0,
        };
        self.0.tick.set(elapsed.max(previous + 1));
    }

    /// Disarms the timer. Canceling an inactive timer does nothing.
    pub fn cancel(&self) {
        if let Some(id) = self.0.id.take() {
            cancel_timer(id);
            trace!(?id, "timer canceled");
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.id.get().is_some()
    }

    /// Number of periods elapsed at the last firing; 1 after a one-shot timer fired.
    pub fn tick(&self) -> u64 {
        self.0.tick.get()
    }

    pub fn is_periodic(&self) -> bool {
        self.0.period.is_some()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("active", &self.is_active())
            .field("tick", &self.tick())
            .field("period", &self.0.period)
            .finish()
    }
}
