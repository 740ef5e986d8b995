use std::fmt::Debug;
use std::sync::Arc;

use parstream_core::runtime::{ErrorSink, ExecutablePartition, PartitionRuntime, QueryHandle};
use parstream_error::Result;

use crate::threaded::ThreadedScheduler;

/// Inner behavior of the execution runtime.
pub trait Scheduler: Sync + Send + Debug + Sized + Clone {
    type Handle: QueryHandle;

    fn try_new(num_threads: usize) -> Result<Self>;

    fn num_threads(&self) -> usize;

    fn spawn_partitions(
        &self,
        partitions: Vec<Box<dyn ExecutablePartition>>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self::Handle;
}

#[derive(Debug, Clone)]
pub struct NativeExecutor<S: Scheduler>(S);

impl<S: Scheduler> NativeExecutor<S> {
    pub fn try_new() -> Result<Self> {
        let threads = num_cpus::get();
        Ok(NativeExecutor(S::try_new(threads)?))
    }

    pub fn try_new_with_num_threads(num_threads: usize) -> Result<Self> {
        Ok(NativeExecutor(S::try_new(num_threads)?))
    }

    pub fn num_threads(&self) -> usize {
        self.0.num_threads()
    }
}

impl<S: Scheduler + 'static> PartitionRuntime for NativeExecutor<S> {
    fn default_partitions(&self) -> usize {
        self.0.num_threads()
    }

    fn spawn_partitions(
        &self,
        partitions: Vec<Box<dyn ExecutablePartition>>,
        errors: Arc<dyn ErrorSink>,
    ) -> Arc<dyn QueryHandle> {
        let handle = self.0.spawn_partitions(partitions, errors);
        Arc::new(handle)
    }
}

pub type ThreadedNativeExecutor = NativeExecutor<ThreadedScheduler>;
