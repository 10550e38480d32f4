//! Runtime subsystem modules.

pub(crate) mod context;
mod core;
pub(crate) mod queue;
pub(crate) mod waker;
mod yield_now;

pub use self::core::Runtime;
pub use yield_now::yield_now;
