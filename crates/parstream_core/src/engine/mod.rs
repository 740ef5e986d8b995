use std::sync::Arc;

use parstream_error::Result;
use tracing::debug;

use crate::config::execution::ExecutionConfig;
use crate::exchange::state::CancellationSignal;
use crate::exchange::{ExchangeRecipient, QueryOutput};
use crate::partition::indexed::IndexedSource;
use crate::query_results::QueryResults;
use crate::query_results::list::ListQueryResults;
use crate::query_results::stream::StreamQueryResults;
use crate::runtime::PartitionRuntime;

/// Entry point for building and executing partitioned queries on a runtime.
///
/// Holds the execution config that's applied to every query built from it.
#[derive(Debug)]
pub struct QueryEngine<R: PartitionRuntime> {
    runtime: R,
    config: ExecutionConfig,
}

impl<R> QueryEngine<R>
where
    R: PartitionRuntime,
{
    pub fn new(runtime: R) -> Self {
        let config = ExecutionConfig::new(&runtime);
        QueryEngine { runtime, config }
    }

    pub fn with_config(runtime: R, config: ExecutionConfig) -> Self {
        QueryEngine { runtime, config }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ExecutionConfig {
        &mut self.config
    }

    /// Create query results over a vector.
    pub fn from_vec<T>(&self, values: Vec<T>) -> Result<ListQueryResults<Vec<T>>>
    where
        T: Clone + Sync + Send + 'static,
    {
        self.from_source(Arc::new(values))
    }

    /// Create query results over an indexed source.
    pub fn from_source<S>(&self, source: Arc<S>) -> Result<ListQueryResults<S>>
    where
        S: IndexedSource,
    {
        ListQueryResults::try_new(source, self.config.partitions, self.config.use_striping)
    }

    /// Create query results over an iterator that can only be enumerated
    /// once.
    pub fn from_iter<I>(&self, iter: I) -> Result<StreamQueryResults<I::IntoIter>>
    where
        I: IntoIterator,
        I::IntoIter: Send + 'static,
        I::Item: Send + 'static,
    {
        StreamQueryResults::try_new(iter.into_iter(), self.config.partitions, self.config.chunk_size)
    }

    /// Execute a query, applying `process` to every element on the workers.
    pub fn execute<T, U, Q, F>(&self, results: &Q, process: F) -> Result<QueryOutput<U>>
    where
        Q: QueryResults<T>,
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Sync + Send + 'static,
    {
        self.execute_with_cancel(results, CancellationSignal::new(), process)
    }

    /// Execute a query that stops once `cancel` is tripped.
    pub fn execute_with_cancel<T, U, Q, F>(
        &self,
        results: &Q,
        cancel: CancellationSignal,
        process: F,
    ) -> Result<QueryOutput<U>>
    where
        Q: QueryResults<T>,
        T: Send + 'static,
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Sync + Send + 'static,
    {
        let mode = self.config.exchange_mode();
        debug!(?results, ?mode, "executing query");

        let recipient = ExchangeRecipient::try_new(self.runtime.clone(), mode, cancel, process)?;
        results.give_partitioned_stream(recipient)
    }
}

#[cfg(test)]
mod tests {
    use std::task::{Context, Poll, Waker};

    use parstream_error::{DbError, ErrorKind};

    use super::*;
    use crate::runtime::{ErrorSink, ExecutablePartition, QueryHandle};

    /// Runtime that executes partitions inline, in partition order, when
    /// spawned.
    ///
    /// Only usable with unordered execution or merge buffers large enough to
    /// hold a whole partition.
    #[derive(Debug, Clone)]
    struct InlineRuntime;

    #[derive(Debug)]
    struct NopHandle;

    impl QueryHandle for NopHandle {
        fn cancel(&self) {}
    }

    impl PartitionRuntime for InlineRuntime {
        fn default_partitions(&self) -> usize {
            4
        }

        fn spawn_partitions(
            &self,
            partitions: Vec<Box<dyn ExecutablePartition>>,
            errors: Arc<dyn ErrorSink>,
        ) -> Arc<dyn QueryHandle> {
            let mut cx = Context::from_waker(Waker::noop());
            for mut partition in partitions {
                match partition.poll_execute(&mut cx) {
                    Poll::Ready(Ok(())) => (),
                    Poll::Ready(Err(e)) => errors.set_error(e),
                    Poll::Pending => panic!("inline partition not expected to park"),
                }
            }
            Arc::new(NopHandle)
        }
    }

    fn new_engine() -> QueryEngine<InlineRuntime> {
        let mut engine = QueryEngine::new(InlineRuntime);
        engine
            .config_mut()
            .set_from_str("merge_buffer_size", "1024")
            .unwrap();
        engine
    }

    #[test]
    fn default_partitions_from_runtime() {
        let engine = QueryEngine::new(InlineRuntime);
        assert_eq!(4, engine.config().partitions);
    }

    #[test]
    fn reset_to_runtime_default() {
        let mut engine = QueryEngine::new(InlineRuntime);
        engine.config_mut().set_from_str("partitions", "9").unwrap();
        assert_eq!(9, engine.config().partitions);

        let runtime = engine.runtime().clone();
        engine.config_mut().reset("partitions", &runtime).unwrap();
        assert_eq!(4, engine.config().partitions);
    }

    #[test]
    fn ordered_from_vec() {
        let engine = new_engine();
        let results = engine.from_vec((0..100).collect::<Vec<i64>>()).unwrap();
        let out = engine
            .execute(&results, |v| Ok(v * 2))
            .unwrap()
            .collect_vec()
            .unwrap();
        assert_eq!((0..100).map(|v| v * 2).collect::<Vec<_>>(), out);
    }

    #[test]
    fn ordered_from_iter_striped_config_ignored() {
        let mut engine = new_engine();
        engine.config_mut().set_from_str("use_striping", "true").unwrap();
        engine.config_mut().set_from_str("chunk_size", "3").unwrap();

        let results = engine.from_iter(0..50).unwrap();
        let out = engine
            .execute(&results, Ok)
            .unwrap()
            .collect_vec()
            .unwrap();
        assert_eq!((0..50).collect::<Vec<_>>(), out);
    }

    #[test]
    fn unordered_same_multiset() {
        let mut engine = new_engine();
        engine.config_mut().set_from_str("preserve_order", "false").unwrap();

        let results = engine.from_vec((0..37).collect::<Vec<u32>>()).unwrap();
        let mut out = engine
            .execute(&results, Ok)
            .unwrap()
            .collect_vec()
            .unwrap();
        out.sort();
        assert_eq!((0..37).collect::<Vec<_>>(), out);
    }

    #[test]
    fn fault_surfaces() {
        let engine = new_engine();
        let results = engine.from_vec((0..20).collect::<Vec<i32>>()).unwrap();
        let err = engine
            .execute(&results, |v| {
                if v == 7 {
                    Err(DbError::new("bad element"))
                } else {
                    Ok(v)
                }
            })
            .unwrap()
            .collect_vec()
            .unwrap_err();

        assert_eq!(ErrorKind::WorkerFault, err.kind());
        // 20 elements over 4 partitions, 7 is in partition 1.
        assert_eq!(Some("1"), err.get_field("partition"));
    }

    #[test]
    fn canceled_before_execute() {
        let engine = new_engine();
        let results = engine.from_vec(vec![1, 2, 3]).unwrap();
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let mut out = engine.execute_with_cancel(&results, cancel, Ok).unwrap();
        let err = out.next().unwrap().unwrap_err();
        assert_eq!(ErrorKind::Cancelled, err.kind());
        assert!(out.next().is_none());
    }
}
