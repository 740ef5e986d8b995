use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use parstream_error::{DbError, Result};
use tracing::trace;

use super::state::QueryState;
use crate::partition::stream::Partition;
use crate::runtime::ExecutablePartition;

/// Per-element work executed on the workers.
pub type ElementFn<T, U> = Arc<dyn Fn(T) -> Result<U> + Sync + Send>;

/// Where a worker writes its processed elements.
pub(crate) trait PartitionOutput<U, K>: Sync + Send {
    /// Check if there's room for another element.
    ///
    /// When there isn't, the waker in `cx` is stored and woken once room
    /// becomes available.
    fn poll_reserve(&self, cx: &mut Context) -> Poll<()>;

    /// Push an element.
    ///
    /// Only called after a successful reserve.
    fn push(&self, item: U, key: K);

    /// Mark this partition's output as complete.
    fn finish(&self);
}

/// Finishes the output, and the partition, on drop.
///
/// Every exit of a worker, including panics, goes through this.
struct OutputGuard<U, K> {
    output: Box<dyn PartitionOutput<U, K>>,
    state: Arc<QueryState>,
}

impl<U, K> Drop for OutputGuard<U, K> {
    fn drop(&mut self) {
        self.output.finish();
        self.state.partition_finished();
    }
}

/// Pulls elements from a single partition, processes them, and writes the
/// results to the partition's output.
pub(crate) struct PartitionWorker<T, K, U> {
    partition: Partition<T, K>,
    process: ElementFn<T, U>,
    output: OutputGuard<U, K>,
    state: Arc<QueryState>,
    /// Number of elements pulled from the partition.
    pulled: usize,
}

impl<T, K, U> PartitionWorker<T, K, U> {
    pub(crate) fn new(
        partition: Partition<T, K>,
        process: ElementFn<T, U>,
        output: Box<dyn PartitionOutput<U, K>>,
        state: Arc<QueryState>,
    ) -> Self {
        PartitionWorker {
            partition,
            process,
            output: OutputGuard {
                output,
                state: state.clone(),
            },
            state,
            pulled: 0,
        }
    }
}

impl<T, K, U> fmt::Debug for PartitionWorker<T, K, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionWorker")
            .field("partition", &self.partition)
            .field("pulled", &self.pulled)
            .finish_non_exhaustive()
    }
}

impl<T, K, U> ExecutablePartition for PartitionWorker<T, K, U>
where
    T: Send,
    K: Send,
    U: Send,
{
    fn partition_idx(&self) -> usize {
        self.partition.partition_idx()
    }

    fn poll_execute(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        loop {
            if self.state.should_stop() {
                trace!(partition = %self.partition_idx(), pulled = %self.pulled, "stopping partition early");
                return Poll::Ready(Ok(()));
            }

            if self.output.output.poll_reserve(cx).is_pending() {
                return Poll::Pending;
            }

            let (elem, key) = match self.partition.next() {
                Some(next) => next,
                None => {
                    trace!(partition = %self.partition_idx(), pulled = %self.pulled, "partition exhausted");
                    return Poll::Ready(Ok(()));
                }
            };
            self.pulled += 1;

            match (self.process)(elem) {
                Ok(out) => self.output.output.push(out, key),
                Err(e) => {
                    return Poll::Ready(Err(DbError::worker_fault(self.partition_idx(), e)));
                }
            }
        }
    }
}
