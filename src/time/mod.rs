//! Time utilities: delays and time limits.
//!
//! - [`sleep`] for a deferred that settles after a delay
//! - [`Deferred::timeout`](crate::Deferred::timeout) for racing a deferred against a timer
//! - [`Stream::timeout`](crate::Stream::timeout) for limiting the gap between stream events
//!
//! Every timer goes through the current zone's `create_timer` hook.
//!
//! # Example: Sleep
//!
//! ```ignore
//! use ripple::time::sleep;
//! use std::time::Duration;
//!
//! let done = sleep(Duration::from_millis(10)).map(|()| "woke up");
//! ```
//!
//! # Example: Timeout
//!
//! ```ignore
//! use ripple::{Completer, TimeoutError};
//! use std::time::Duration;
//!
//! let never = Completer::<u8>::new();
//! let limited = never.deferred().timeout(Duration::from_millis(5));
//! // settles with a `TimeoutError` after 5ms
//! ```

pub(crate) mod timeout;

use crate::deferred::{Deferred, Outcome};

use std::time::Duration;

/// A deferred that settles with `()` after `duration`.
///
/// # Arguments
/// * `duration` - How long to wait
pub fn sleep(duration: Duration) -> Deferred<()> {
    Deferred::delayed(duration, || Ok(Outcome::Ready(())))
}
