mod handle;
mod task;

use std::fmt;
use std::sync::Arc;

pub use handle::ThreadedQueryHandle;
use parking_lot::Mutex;
use parstream_core::runtime::{ErrorSink, ExecutablePartition};
use parstream_error::{DbError, Result, ResultExt};
use rayon::{ThreadPool, ThreadPoolBuilder};
use task::{PartitionState, PartitionTask, TaskState};
use tracing::debug;

use crate::runtime::Scheduler;

/// Scheduler for executing partitions on a thread pool.
///
/// Each partition is a task. A task runs until its partition completes or
/// can't make progress, and is spawned again when woken.
#[derive(Clone)]
pub struct ThreadedScheduler {
    pool: Arc<ThreadPool>,
}

impl fmt::Debug for ThreadedScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("num_threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}

impl Scheduler for ThreadedScheduler {
    type Handle = ThreadedQueryHandle;

    fn try_new(num_threads: usize) -> Result<Self> {
        if num_threads == 0 {
            return Err(DbError::invalid_argument(
                "Number of threads must be greater than zero",
            ));
        }

        let thread_pool = ThreadPoolBuilder::new()
            .thread_name(|idx| format!("parstream_worker_{idx}"))
            .num_threads(num_threads)
            .build()
            .context("Failed to build thread pool")?;

        Ok(ThreadedScheduler {
            pool: Arc::new(thread_pool),
        })
    }

    fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Spawn execution of all partitions on the thread pool.
    ///
    /// Each partition is independently executed.
    fn spawn_partitions(
        &self,
        partitions: Vec<Box<dyn ExecutablePartition>>,
        errors: Arc<dyn ErrorSink>,
    ) -> ThreadedQueryHandle {
        debug!(partitions = %partitions.len(), "spawning execution of partitions");

        let task_states: Vec<_> = partitions
            .into_iter()
            .map(|partition| {
                Arc::new(TaskState {
                    partition_idx: partition.partition_idx(),
                    partition: Mutex::new(PartitionState {
                        partition: Some(partition),
                        query_canceled: false,
                    }),
                    errors: errors.clone(),
                    pool: self.pool.clone(),
                })
            })
            .collect();

        let handle = ThreadedQueryHandle {
            states: Mutex::new(task_states.clone()),
            errors,
        };

        for state in task_states {
            let task = PartitionTask::from_task_state(state);
            self.pool.spawn(|| task.execute());
        }

        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::task::{Context, Poll};

    use parstream_core::runtime::QueryHandle;
    use parstream_error::ErrorKind;

    use super::*;

    #[derive(Debug, Default)]
    struct CollectingSink {
        errors: Mutex<Vec<DbError>>,
    }

    impl ErrorSink for CollectingSink {
        fn set_error(&self, error: DbError) {
            self.errors.lock().push(error);
        }
    }

    /// Partition that reports its index on drop.
    #[derive(Debug)]
    struct TestPartition {
        idx: usize,
        behavior: Behavior,
        done: mpsc::Sender<usize>,
    }

    #[derive(Debug)]
    enum Behavior {
        Complete,
        Fail,
        Panic,
        /// Park forever, never waking.
        Park,
    }

    impl ExecutablePartition for TestPartition {
        fn partition_idx(&self) -> usize {
            self.idx
        }

        fn poll_execute(&mut self, _cx: &mut Context) -> Poll<Result<()>> {
            match self.behavior {
                Behavior::Complete => Poll::Ready(Ok(())),
                Behavior::Fail => Poll::Ready(Err(DbError::new("failed"))),
                Behavior::Panic => panic!("partition {} panicked", self.idx),
                Behavior::Park => Poll::Pending,
            }
        }
    }

    impl Drop for TestPartition {
        fn drop(&mut self) {
            let _ = self.done.send(self.idx);
        }
    }

    fn spawn(
        behaviors: Vec<Behavior>,
    ) -> (
        ThreadedQueryHandle,
        Arc<CollectingSink>,
        mpsc::Receiver<usize>,
    ) {
        let scheduler = ThreadedScheduler::try_new(2).unwrap();
        let sink = Arc::new(CollectingSink::default());
        let (tx, rx) = mpsc::channel();

        let partitions: Vec<Box<dyn ExecutablePartition>> = behaviors
            .into_iter()
            .enumerate()
            .map(|(idx, behavior)| {
                Box::new(TestPartition {
                    idx,
                    behavior,
                    done: tx.clone(),
                }) as _
            })
            .collect();

        let handle = scheduler.spawn_partitions(partitions, sink.clone());
        (handle, sink, rx)
    }

    fn wait_dropped(rx: &mpsc::Receiver<usize>, count: usize) -> Vec<usize> {
        let mut dropped: Vec<_> = (0..count).map(|_| rx.recv().unwrap()).collect();
        dropped.sort();
        dropped
    }

    #[test]
    fn zero_threads() {
        let err = ThreadedScheduler::try_new(0).unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());
    }

    #[test]
    fn completed_partitions_dropped() {
        let (_handle, sink, rx) = spawn(vec![Behavior::Complete, Behavior::Complete]);
        assert_eq!(vec![0, 1], wait_dropped(&rx, 2));
        assert!(sink.errors.lock().is_empty());
    }

    #[test]
    fn error_reported_before_drop() {
        let (_handle, sink, rx) = spawn(vec![Behavior::Fail]);
        assert_eq!(vec![0], wait_dropped(&rx, 1));

        let errors = sink.errors.lock();
        assert_eq!(1, errors.len());
        assert_eq!("failed", errors[0].get_msg());
    }

    #[test]
    fn panic_reported_as_worker_fault() {
        let (_handle, sink, rx) = spawn(vec![Behavior::Complete, Behavior::Panic]);
        assert_eq!(vec![0, 1], wait_dropped(&rx, 2));

        let errors = sink.errors.lock();
        assert_eq!(1, errors.len());
        assert_eq!(ErrorKind::WorkerFault, errors[0].kind());
        assert_eq!(Some("1"), errors[0].get_field("partition"));
    }

    #[test]
    fn cancel_drops_parked_partitions() {
        let (handle, sink, rx) = spawn(vec![Behavior::Park, Behavior::Park]);
        handle.cancel();
        assert_eq!(vec![0, 1], wait_dropped(&rx, 2));

        let errors = sink.errors.lock();
        assert!(errors.iter().all(|e| e.kind() == ErrorKind::Cancelled));
    }
}
