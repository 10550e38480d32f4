//! Error types shared by deferred computations, zones and streams.
//!
//! Two families live here:
//!
//! - [`UsageError`]: synchronous programming mistakes (double completion, adding to a
//!   closed controller, listening twice). These are returned immediately at the call
//!   site and never travel through the asynchronous machinery.
//! - [`AsyncError`] + [`StackTrace`] = [`Failure`]: the payload of a settlement error.
//!   A failure is an ordinary outcome of a [`Deferred`](crate::Deferred) or an error
//!   event on a [`Stream`](crate::Stream).

use crate::runtime::context;

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;

/// Misuse of a producer or consumer handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// `complete`/`complete_error` was called on an already completed completer.
    #[error("completer has already been completed")]
    AlreadyCompleted,

    /// An event was added after the controller was closed.
    #[error("cannot add events after the controller was closed")]
    Closed,

    /// An event was added while `add_stream` was still forwarding another stream.
    #[error("cannot add events while a stream is being added")]
    AddingStream,

    /// A single-subscription stream was listened to more than once.
    #[error("stream has already been listened to")]
    AlreadyListened,
}

/// Errors produced by the runtime itself as settlement errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("no element")]
    NoElement,

    #[error("too many elements")]
    TooManyElements,

    #[error("index {index} out of range for a stream of {length} elements")]
    IndexOutOfRange { index: usize, length: usize },

    #[error("a deferred cannot be chained to itself")]
    ChainedToItself,
}

/// Settlement error of a [`Deferred::timeout`](crate::Deferred::timeout) or
/// [`Stream::timeout`](crate::Stream::timeout) whose time limit elapsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no result within {duration:?}")]
pub struct TimeoutError {
    pub duration: Duration,
}

/// A plain text error, used by [`AsyncError::msg`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct Message(pub String);

/// A shareable error object carried by settlement errors and stream error events.
///
/// Cloning is cheap and preserves identity: [`AsyncError::ptr_eq`] tells whether two
/// handles refer to the same error object, which is how a rethrown error is recognised.
#[derive(Clone)]
pub struct AsyncError(Rc<dyn StdError + 'static>);

impl AsyncError {
    pub fn new<E: StdError + 'static>(error: E) -> Self {
        Self(Rc::new(error))
    }

    /// Creates an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Returns true when both handles point at the same error object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }

    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.0.is::<E>()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }
}

impl<E: StdError + 'static> From<E> for AsyncError {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Debug for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

/// The trace recorded alongside a settlement error.
///
/// Captured traces are reference counted so a rethrown error keeps the trace of the
/// original failure. Capturing can be disabled with
/// [`RuntimeBuilder::capture_traces`](crate::RuntimeBuilder::capture_traces).
#[derive(Clone, Default)]
pub struct StackTrace(Option<Rc<Backtrace>>);

impl StackTrace {
    /// Records the current call stack (subject to `RUST_BACKTRACE`).
    pub fn capture() -> Self {
        if context::capture_traces() {
            Self(Some(Rc::new(Backtrace::capture())))
        } else {
            Self(None)
        }
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns true when both traces are the same recording. Two empty traces compare equal.
    pub fn same_as(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(trace) => write!(f, "StackTrace({:?})", trace.status()),
            None => f.write_str("StackTrace(empty)"),
        }
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(trace) => fmt::Display::fmt(trace, f),
            None => Ok(()),
        }
    }
}

/// An error together with the trace it was raised with.
#[derive(Clone, Debug)]
pub struct Failure {
    pub error: AsyncError,
    pub trace: StackTrace,
}

impl Failure {
    pub fn new(error: AsyncError, trace: StackTrace) -> Self {
        Self { error, trace }
    }

    /// Wraps `error` with a freshly captured trace.
    pub fn capture(error: impl Into<AsyncError>) -> Self {
        Self::new(error.into(), StackTrace::capture())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}
