//! Consumption of partitioned streams.
//!
//! The exchange spawns one worker per partition on a [`PartitionRuntime`],
//! and hands back a single iterator over the processed elements. Depending
//! on the mode, elements are either merged by key to preserve order, or
//! emitted as soon as any worker produces them.
mod buffer;
mod merge;
pub mod state;
mod unordered;
mod worker;

use std::fmt;
use std::sync::Arc;

use parstream_error::{DbError, Result};
use tracing::debug;

use self::buffer::{BufferOutput, PartitionBuffer};
use self::merge::OrderedMerge;
use self::state::{CancellationSignal, QueryState};
use self::unordered::unordered_exchange;
pub use self::worker::ElementFn;
use self::worker::{PartitionOutput, PartitionWorker};
use crate::partition::comparer::OrderKey;
use crate::partition::recipient::PartitionedStreamRecipient;
use crate::partition::stream::PartitionedStream;
use crate::runtime::{ErrorSink, ExecutablePartition, PartitionRuntime, QueryHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// Workers drain partitions independently, elements are emitted in
    /// arrival order.
    ///
    /// Each partition buffers at most `buffer_size` elements ahead of the
    /// consumer.
    Unordered { buffer_size: usize },
    /// Elements are merged by order key.
    ///
    /// Each partition buffers at most `buffer_size` elements ahead of the
    /// merge.
    OrderedMerge { buffer_size: usize },
}

impl ExchangeMode {
    pub fn buffer_size(&self) -> usize {
        match self {
            Self::Unordered { buffer_size } | Self::OrderedMerge { buffer_size } => *buffer_size,
        }
    }
}

/// Recipient that executes a partitioned stream on a runtime.
pub struct ExchangeRecipient<R, T, U> {
    runtime: R,
    mode: ExchangeMode,
    cancel: CancellationSignal,
    process: ElementFn<T, U>,
}

impl<R, T, U> ExchangeRecipient<R, T, U>
where
    R: PartitionRuntime,
{
    /// Create a new exchange recipient.
    ///
    /// Errors if the per-partition buffer size is zero.
    pub fn try_new<F>(
        runtime: R,
        mode: ExchangeMode,
        cancel: CancellationSignal,
        process: F,
    ) -> Result<Self>
    where
        F: Fn(T) -> Result<U> + Sync + Send + 'static,
    {
        if mode.buffer_size() == 0 {
            return Err(DbError::invalid_argument(
                "Partition buffer size must be greater than zero",
            ));
        }

        Ok(ExchangeRecipient {
            runtime,
            mode,
            cancel,
            process: Arc::new(process),
        })
    }
}

impl<R, T, U> fmt::Debug for ExchangeRecipient<R, T, U>
where
    R: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRecipient")
            .field("runtime", &self.runtime)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl<R, T, U> PartitionedStreamRecipient<T> for ExchangeRecipient<R, T, U>
where
    R: PartitionRuntime,
    T: Send + 'static,
    U: Send + 'static,
{
    type Output = QueryOutput<U>;

    fn receive<K: OrderKey>(self, stream: PartitionedStream<T, K>) -> Self::Output {
        let partition_count = stream.partition_count();
        let (partitions, comparer) = stream.into_parts();
        let state = Arc::new(QueryState::new(self.cancel, partition_count));

        debug!(partitions = %partition_count, mode = ?self.mode, "executing partitioned stream");

        let (outputs, iter): (Vec<Box<dyn PartitionOutput<U, K>>>, ResultIter<U>) = match self.mode
        {
            ExchangeMode::Unordered { buffer_size } => {
                let (outputs, drain) =
                    unordered_exchange::<U, K>(partition_count, buffer_size, state.clone());
                let outputs: Vec<Box<dyn PartitionOutput<U, K>>> = outputs
                    .into_iter()
                    .map(|output| Box::new(output) as Box<dyn PartitionOutput<U, K>>)
                    .collect();
                (outputs, Box::new(drain) as ResultIter<U>)
            }
            ExchangeMode::OrderedMerge { buffer_size } => {
                let buffers: Vec<_> = (0..partition_count)
                    .map(|_| Arc::new(PartitionBuffer::new(buffer_size)))
                    .collect();
                let outputs: Vec<Box<dyn PartitionOutput<U, K>>> = buffers
                    .iter()
                    .map(|buffer| {
                        Box::new(BufferOutput(buffer.clone())) as Box<dyn PartitionOutput<U, K>>
                    })
                    .collect();
                let merge = OrderedMerge::new(buffers, comparer, state.clone());
                (outputs, Box::new(merge) as ResultIter<U>)
            }
        };

        let workers: Vec<Box<dyn ExecutablePartition>> = partitions
            .into_iter()
            .zip(outputs)
            .map(|(partition, output)| {
                Box::new(PartitionWorker::new(
                    partition,
                    self.process.clone(),
                    output,
                    state.clone(),
                )) as Box<dyn ExecutablePartition>
            })
            .collect();

        let errors: Arc<dyn ErrorSink> = state;
        let handle = self.runtime.spawn_partitions(workers, errors);

        QueryOutput {
            iter,
            handle,
            partitions: partition_count,
        }
    }
}

type ResultIter<U> = Box<dyn Iterator<Item = Result<U>> + Send>;

/// Output of an executing query.
///
/// Yields processed elements until all partitions are exhausted. If a worker
/// fails or the query is canceled, a single error is yielded after every
/// worker stopped, after which the iterator is exhausted.
///
/// Dropping the output before it's exhausted stops the query.
pub struct QueryOutput<U> {
    iter: ResultIter<U>,
    handle: Arc<dyn QueryHandle>,
    partitions: usize,
}

impl<U> QueryOutput<U> {
    pub fn partition_count(&self) -> usize {
        self.partitions
    }

    /// Cancel the query.
    ///
    /// Unless the output is already exhausted, the next element pulled will
    /// be a cancellation error.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Collect all elements, or return the first surfaced error.
    pub fn collect_vec(self) -> Result<Vec<U>> {
        self.collect()
    }
}

impl<U> Iterator for QueryOutput<U> {
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl<U> fmt::Debug for QueryOutput<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOutput")
            .field("handle", &self.handle)
            .field("partitions", &self.partitions)
            .finish_non_exhaustive()
    }
}
