use std::fmt::Debug;
use std::sync::Arc;
use std::task::{Context, Poll};

use parstream_error::{DbError, Result};

/// A unit of work executing a single partition.
///
/// Polling drives the partition forward. `Poll::Pending` is returned when the
/// partition can't make progress (e.g. its output buffer is full), after
/// arranging for the waker in `cx` to be woken once progress can be made.
///
/// Once `Poll::Ready` is returned, the partition must not be polled again and
/// should be dropped. Dropping signals completion of the partition to the
/// consumer.
pub trait ExecutablePartition: Debug + Send {
    fn partition_idx(&self) -> usize;

    fn poll_execute(&mut self, cx: &mut Context) -> Poll<Result<()>>;
}

/// How partitions get executed.
///
/// Implementations decide where and on how many threads partitions run. The
/// partitioning itself is decided before spawning, and is never changed by
/// the runtime.
pub trait PartitionRuntime: Debug + Sync + Send + Clone {
    /// Number of partitions to default to when executing.
    fn default_partitions(&self) -> usize;

    /// Spawn execution of all partitions for a query.
    ///
    /// Errors encountered during execution are written to the error sink.
    ///
    /// This must not block.
    fn spawn_partitions(
        &self,
        partitions: Vec<Box<dyn ExecutablePartition>>,
        errors: Arc<dyn ErrorSink>,
    ) -> Arc<dyn QueryHandle>;
}

/// A handle to a running or recently completed query.
pub trait QueryHandle: Debug + Sync + Send {
    /// Cancel the query.
    ///
    /// Best effort. Partitions observe cancellation at their next element
    /// boundary.
    fn cancel(&self);
}

/// Where to put errors that happen during execution.
///
/// Passed to each partition task. Cancellation is reported here as an error
/// with a `Cancelled` kind.
pub trait ErrorSink: Debug + Sync + Send {
    fn set_error(&self, error: DbError);
}
