use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use parstream_core::runtime::{ErrorSink, ExecutablePartition};
use parstream_error::DbError;
use rayon::ThreadPool;
use tracing::{error, trace};

#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) partition_idx: usize,
    /// The partition we're operating on alongside a boolean for if the
    /// query's been canceled.
    pub(crate) partition: Mutex<PartitionState>,
    /// Error sink for any errors that occur during execution.
    pub(crate) errors: Arc<dyn ErrorSink>,
    /// The threadpool to execute on.
    pub(crate) pool: Arc<ThreadPool>,
}

impl Wake for TaskState {
    fn wake(self: Arc<Self>) {
        let pool = self.pool.clone();
        let task = PartitionTask { state: self };
        pool.spawn(|| task.execute());
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Arc::clone(self).wake();
    }
}

#[derive(Debug)]
pub(crate) struct PartitionState {
    /// None once the partition completed.
    pub(crate) partition: Option<Box<dyn ExecutablePartition>>,
    pub(crate) query_canceled: bool,
}

/// Task for executing a partition.
pub(crate) struct PartitionTask {
    state: Arc<TaskState>,
}

impl PartitionTask {
    pub(crate) fn from_task_state(state: Arc<TaskState>) -> Self {
        PartitionTask { state }
    }

    pub(crate) fn execute(self) {
        let mut guard = self.state.partition.lock();
        let partition_state = &mut *guard;

        let Some(partition) = partition_state.partition.as_mut() else {
            // Already completed, nothing to do. Can happen with a wake racing
            // a cancel.
            return;
        };

        if partition_state.query_canceled {
            self.state.errors.set_error(DbError::cancelled());
            partition_state.partition = None;
            return;
        }

        let waker: Waker = self.state.clone().into();
        let mut cx = Context::from_waker(&waker);

        let poll = panic::catch_unwind(AssertUnwindSafe(|| partition.poll_execute(&mut cx)));

        match poll {
            Ok(Poll::Ready(Ok(()))) => {
                trace!(partition = %self.state.partition_idx, "partition completed");
            }
            Ok(Poll::Ready(Err(e))) => {
                self.state.errors.set_error(e);
            }
            Ok(Poll::Pending) => {
                // Waker was already stored by the partition, we'll be woken
                // back up once it can make progress.
                return;
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(partition = %self.state.partition_idx, %msg, "partition panicked");
                self.state.errors.set_error(DbError::worker_fault(
                    self.state.partition_idx,
                    DbError::new(format!("Partition panicked: {msg}")),
                ));
            }
        }

        // Errors must be in the sink before the partition signals completion
        // through drop.
        partition_state.partition = None;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
