//! Combining several deferreds into one.

use crate::deferred::Deferred;
use crate::error::Failure;

use std::cell::RefCell;
use std::rc::Rc;

struct WaitAll<T> {
    values: Vec<Option<T>>,
    remaining: usize,
    error: Option<Failure>,
}

/// Waits for every deferred and settles with their values in input order.
///
/// On the first error:
/// - with `eager_error`, the result settles with that error immediately;
/// - otherwise it settles with that error once every input settled.
///
/// Later errors are dropped. Once an error occurred, `cleanup` receives the values
/// collected before it and every value that arrives afterwards. An empty input settles
/// with an empty list.
pub fn wait_all<T: Clone + 'static>(
    futures: Vec<Deferred<T>>,
    eager_error: bool,
    cleanup: Option<Rc<dyn Fn(T)>>,
) -> Deferred<Vec<T>> {
    if futures.is_empty() {
        return Deferred::value(Vec::new());
    }

    let result = Deferred::pending();
    let state = Rc::new(RefCell::new(WaitAll {
        values: vec![None; futures.len()],
        remaining: futures.len(),
        error: None,
    }));

    for (index, future) in futures.iter().enumerate() {
        let state = state.clone();
        let result = result.clone();
        let cleanup = cleanup.clone();

        future.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let mut wait = state.borrow_mut();
                wait.remaining -= 1;

                let Some(failure) = wait.error.clone() else {
                    wait.values[index] = Some(value);
                    if wait.remaining == 0 {
                        let values: Vec<T> = wait.values.drain(..).flatten().collect();
                        drop(wait);
                        result.settle(Ok(values));
                    }
                    return;
                };

                let finished = wait.remaining == 0;
                drop(wait);

                if let Some(cleanup) = &cleanup {
                    cleanup(value);
                }
                if finished && !eager_error {
                    result.settle(Err(failure));
                }
            }
            Err(failure) => {
                let mut wait = state.borrow_mut();
                wait.remaining -= 1;

                let first = wait.error.is_none();
                if first {
                    wait.error = Some(failure.clone());
                }
                let collected: Vec<T> = if first && cleanup.is_some() {
                    wait.values.iter_mut().filter_map(Option::take).collect()
                } else {
                    Vec::new()
                };
                let finished = wait.remaining == 0;
                let reported = wait.error.clone();
                drop(wait);

                if let Some(cleanup) = &cleanup {
                    for value in collected {
                        cleanup(value);
                    }
                }

                if eager_error {
                    if first {
                        result.settle(Err(failure));
                    }
                } else if finished {
                    if let Some(reported) = reported {
                        result.settle(Err(reported));
                    }
                }
            }
        });
    }

    result
}

/// Settles with the outcome of whichever deferred settles first.
///
/// The other outcomes are discarded, errors included. An empty input never settles.
pub fn first_of<T: Clone + 'static>(futures: Vec<Deferred<T>>) -> Deferred<T> {
    let result = Deferred::pending();

    for future in &futures {
        let result = result.clone();
        future.on_settled(move |outcome| {
            if !result.is_settled() {
                result.settle(outcome);
            }
        });
    }

    result
}
