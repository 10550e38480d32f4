//! Operations that consume a whole stream into one deferred result.
//!
//! Each one listens to the stream right away. The first error event, or a result known
//! before the stream is done (`first`, `contains`, ...), cancels the subscription; the
//! returned deferred settles once that cancellation completed.

use crate::deferred::Deferred;
use crate::error::{AsyncError, Failure, StackTrace, StateError, UsageError};
use crate::stream::subscription::{StreamSubscription, Subscriber};
use crate::stream::Stream;

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;
use std::rc::Rc;

enum Flow<R> {
    Continue,
    Finish(Result<R, Failure>),
}

fn no_element() -> Failure {
    Failure::capture(StateError::NoElement)
}

fn consume<T, R>(
    stream: &Stream<T>,
    on_data: impl FnMut(T) -> Flow<R> + 'static,
    on_done: impl FnOnce() -> Result<R, Failure> + 'static,
) -> Result<Deferred<R>, UsageError>
where
    T: Clone + 'static,
    R: Clone + 'static,
{
    let result = Deferred::pending();
    let subscription: Rc<RefCell<Option<StreamSubscription<T>>>> = Rc::new(RefCell::new(None));
    let finished = Rc::new(Cell::new(false));
    let on_data = RefCell::new(on_data);
    let on_done = RefCell::new(Some(on_done));

    let subscriber = Subscriber::new()
        .on_data({
            let (result, subscription, finished) =
                (result.clone(), subscription.clone(), finished.clone());
            move |value: T| {
                if finished.get() {
                    return;
                }
                let flow = {
                    let mut step = on_data.borrow_mut();
                    (*step)(value)
                };
                if let Flow::Finish(outcome) = flow {
                    finish(&subscription, &finished, &result, outcome);
                }
            }
        })
        .on_error_with_trace({
            let (result, subscription, finished) =
                (result.clone(), subscription.clone(), finished.clone());
            move |error: AsyncError, trace: StackTrace| {
                finish(&subscription, &finished, &result, Err(Failure::new(error, trace)))
            }
        })
        .on_done({
            let (result, finished) = (result.clone(), finished.clone());
            move || {
                if finished.replace(true) {
                    return;
                }
                let on_done = on_done.borrow_mut().take();
                if let Some(on_done) = on_done {
                    result.settle(on_done());
                }
            }
        });

    let listened = stream.listen_with(subscriber)?;
    if !finished.get() {
        *subscription.borrow_mut() = Some(listened);
    }
    Ok(result)
}

fn finish<T: 'static, R: Clone + 'static>(
    subscription: &RefCell<Option<StreamSubscription<T>>>,
    finished: &Cell<bool>,
    result: &Deferred<R>,
    outcome: Result<R, Failure>,
) {
    if finished.replace(true) {
        return;
    }

    let subscription = subscription.borrow_mut().take();
    match subscription {
        Some(subscription) => {
            let result = result.clone();
            subscription
                .cancel()
                .on_settled(move |_| result.settle(outcome));
        }
        None => result.settle(outcome),
    }
}

impl<T: Clone + 'static> Stream<T> {
    /// Combines all values into one, starting from `initial`.
    pub fn fold<R: Clone + 'static>(
        &self,
        initial: R,
        combine: impl Fn(R, T) -> R + 'static,
    ) -> Result<Deferred<R>, UsageError> {
        let accumulator = Rc::new(RefCell::new(Some(initial)));
        let last = accumulator.clone();

        consume(
            self,
            move |value: T| {
                let current = accumulator.borrow_mut().take();
                if let Some(current) = current {
                    let next = combine(current, value);
                    *accumulator.borrow_mut() = Some(next);
                }
                Flow::Continue
            },
            move || last.borrow_mut().take().ok_or_else(no_element),
        )
    }

    /// Combines all values pairwise. Fails with [`StateError::NoElement`] on an empty
    /// stream.
    pub fn reduce(&self, combine: impl Fn(T, T) -> T + 'static) -> Result<Deferred<T>, UsageError> {
        let accumulator: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let last = accumulator.clone();

        consume(
            self,
            move |value: T| {
                let current = accumulator.borrow_mut().take();
                let next = match current {
                    Some(current) => combine(current, value),
                    None => value,
                };
                *accumulator.borrow_mut() = Some(next);
                Flow::Continue
            },
            move || last.borrow_mut().take().ok_or_else(no_element),
        )
    }

    /// The display form of all values, joined by `separator`.
    pub fn join(&self, separator: &str) -> Result<Deferred<String>, UsageError>
    where
        T: Display,
    {
        let separator = separator.to_owned();
        let joined = Rc::new(RefCell::new(None::<String>));
        let last = joined.clone();

        consume(
            self,
            move |value: T| {
                let mut joined = joined.borrow_mut();
                match joined.as_mut() {
                    Some(text) => {
                        text.push_str(&separator);
                        text.push_str(&value.to_string());
                    }
                    None => *joined = Some(value.to_string()),
                }
                Flow::Continue
            },
            move || Ok(last.borrow_mut().take().unwrap_or_default()),
        )
    }

    /// Whether some value equals `needle`. Stops at the first match.
    pub fn contains(&self, needle: T) -> Result<Deferred<bool>, UsageError>
    where
        T: PartialEq,
    {
        consume(
            self,
            move |value: T| {
                if value == needle {
                    Flow::Finish(Ok(true))
                } else {
                    Flow::Continue
                }
            },
            || Ok(false),
        )
    }

    /// Calls `action` for each value. Settles once the stream is done.
    pub fn for_each(&self, action: impl Fn(T) + 'static) -> Result<Deferred<()>, UsageError> {
        consume(
            self,
            move |value: T| {
                action(value);
                Flow::Continue
            },
            || Ok(()),
        )
    }

    /// Whether `test` accepts every value. Stops at the first rejection.
    pub fn every(&self, test: impl Fn(&T) -> bool + 'static) -> Result<Deferred<bool>, UsageError> {
        consume(
            self,
            move |value: T| {
                if test(&value) {
                    Flow::Continue
                } else {
                    Flow::Finish(Ok(false))
                }
            },
            || Ok(true),
        )
    }

    /// Whether `test` accepts some value. Stops at the first match.
    pub fn any(&self, test: impl Fn(&T) -> bool + 'static) -> Result<Deferred<bool>, UsageError> {
        consume(
            self,
            move |value: T| {
                if test(&value) {
                    Flow::Finish(Ok(true))
                } else {
                    Flow::Continue
                }
            },
            || Ok(false),
        )
    }

    /// The number of data events.
    pub fn length(&self) -> Result<Deferred<usize>, UsageError> {
        let count = Rc::new(Cell::new(0usize));
        let last = count.clone();

        consume(
            self,
            move |_: T| {
                count.set(count.get() + 1);
                Flow::Continue
            },
            move || Ok(last.get()),
        )
    }

    /// Whether the stream is done without any data event. Stops at the first one.
    pub fn is_empty(&self) -> Result<Deferred<bool>, UsageError> {
        consume(self, |_: T| Flow::Finish(Ok(false)), || Ok(true))
    }

    pub fn to_list(&self) -> Result<Deferred<Vec<T>>, UsageError> {
        let items = Rc::new(RefCell::new(Vec::new()));
        let last = items.clone();

        consume(
            self,
            move |value: T| {
                items.borrow_mut().push(value);
                Flow::Continue
            },
            move || Ok(std::mem::take(&mut *last.borrow_mut())),
        )
    }

    pub fn to_set(&self) -> Result<Deferred<HashSet<T>>, UsageError>
    where
        T: Eq + Hash,
    {
        let items = Rc::new(RefCell::new(HashSet::new()));
        let last = items.clone();

        consume(
            self,
            move |value: T| {
                items.borrow_mut().insert(value);
                Flow::Continue
            },
            move || Ok(std::mem::take(&mut *last.borrow_mut())),
        )
    }

    /// Discards every value. Settles once the stream is done.
    pub fn drain(&self) -> Result<Deferred<()>, UsageError> {
        consume(self, |_: T| Flow::Continue, || Ok(()))
    }

    pub fn first(&self) -> Result<Deferred<T>, UsageError> {
        consume(self, |value: T| Flow::Finish(Ok(value)), || Err(no_element()))
    }

    pub fn last(&self) -> Result<Deferred<T>, UsageError> {
        let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let last = latest.clone();

        consume(
            self,
            move |value: T| {
                *latest.borrow_mut() = Some(value);
                Flow::Continue
            },
            move || last.borrow_mut().take().ok_or_else(no_element),
        )
    }

    /// The only value. Fails with [`StateError::TooManyElements`] as soon as a second
    /// one arrives, and with [`StateError::NoElement`] on an empty stream.
    pub fn single(&self) -> Result<Deferred<T>, UsageError> {
        let seen: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let last = seen.clone();

        consume(
            self,
            move |value: T| {
                let mut seen = seen.borrow_mut();
                if seen.is_some() {
                    return Flow::Finish(Err(Failure::capture(StateError::TooManyElements)));
                }
                *seen = Some(value);
                Flow::Continue
            },
            move || last.borrow_mut().take().ok_or_else(no_element),
        )
    }

    /// The value at `index`, counting from zero.
    pub fn element_at(&self, index: usize) -> Result<Deferred<T>, UsageError> {
        let count = Rc::new(Cell::new(0usize));
        let last = count.clone();

        consume(
            self,
            move |value: T| {
                let position = count.get();
                count.set(position + 1);
                if position == index {
                    Flow::Finish(Ok(value))
                } else {
                    Flow::Continue
                }
            },
            move || {
                Err(Failure::capture(StateError::IndexOutOfRange {
                    index,
                    length: last.get(),
                }))
            },
        )
    }
}
