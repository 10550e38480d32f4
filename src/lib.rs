//! Single-threaded cooperative runtime with deferred values, zones and streams.
//!
//! Everything runs on one thread. Work is queued as microtasks (run first, in FIFO
//! order) or timers (run once no microtask is left), and a [`Runtime`] drives both.
//!
//! # Architecture
//!
//! - **Runtime**: the event loop; `run` until idle, or `block_on` a future
//! - **Deferred / Completer**: a value available later, and the handle that settles it
//! - **Zone**: an execution context whose hooks intercept scheduling, callbacks and
//!   uncaught errors
//! - **Stream / StreamController**: asynchronous event sequences with pause, resume and
//!   cancel
//! - **Timer**: one-shot and periodic callbacks, always created through a zone
//! - **spawn**: drives Rust futures on the loop and exposes them as deferreds
//!
//! ```ignore
//! use ripple::{Completer, Runtime};
//!
//! let mut rt = Runtime::new();
//! let completer = Completer::new();
//! let doubled = completer.deferred().map(|n: i32| n * 2);
//! completer.complete(21).unwrap();
//! assert_eq!(rt.block_on(doubled).unwrap(), 42);
//! ```

mod builder;
mod deferred;
mod error;
mod runtime;
mod stream;
mod task;
pub mod time;
mod timer;
mod utils;
pub mod zone;

pub use builder::{RuntimeBuilder, UncaughtErrorPolicy};
pub use deferred::{
    Completer, Deferred, DeferredFuture, ErrorHandler, ErrorTest, Outcome, first_of, wait_all,
};
pub use error::{
    AsyncError, Failure, Message, StackTrace, StateError, TimeoutError, UsageError,
};
pub use runtime::{Runtime, yield_now};
pub use stream::{
    ControllerBuilder, ControllerSink, EventSink, HandlerTransformer, Stream, StreamConsumer,
    StreamController, StreamErrorHandler, StreamSubscription, StreamTransformer, Subscriber,
};
pub use task::spawn;
pub use timer::Timer;
pub use zone::{Zone, ZoneDelegate, ZoneSpecification, ZoneValues};
