use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;

/// Destination for finalized [`LogRecord`]s.
///
/// Records reach a sink already redacted and normalized; a sink only has to
/// serialize and store them (stdout, rotating file, memory, ...). The
/// [`Dispatcher`](crate::dispatch::Dispatcher) drives sinks from its
/// background task, never from the thread that emitted the record.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Write a single record.
    ///
    /// An `Err` makes the dispatcher retry the whole batch with backoff and
    /// eventually drop it.
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Push buffered bytes to the backend. Called after every batch.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Short label used in dispatcher diagnostics.
    fn name(&self) -> &'static str {
        "log"
    }
}
