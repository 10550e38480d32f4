use crate::deferred::Deferred;
use crate::error::{AsyncError, StackTrace, UsageError};
use crate::stream::Stream;

/// Something events can be pushed into.
pub trait EventSink<T> {
    fn add(&self, value: T) -> Result<(), UsageError>;

    /// Pushes an error event. Without a trace, one is captured at the call.
    fn add_error(&self, error: AsyncError, trace: Option<StackTrace>) -> Result<(), UsageError>;

    /// Ends the event sequence. The deferred settles once the end has been handled.
    fn close(&self) -> Result<Deferred<()>, UsageError>;
}

/// Something that can absorb a whole stream.
pub trait StreamConsumer<T> {
    /// Consumes every event of `stream`. The deferred settles when the stream is done.
    fn add_stream(&self, stream: &Stream<T>) -> Result<Deferred<()>, UsageError>;

    fn close(&self) -> Result<Deferred<()>, UsageError>;
}
