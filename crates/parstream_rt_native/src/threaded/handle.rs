use std::sync::Arc;
use std::task::Wake;

use parking_lot::Mutex;
use parstream_core::runtime::{ErrorSink, QueryHandle};
use parstream_error::DbError;

use super::task::TaskState;

/// Query handle for queries being executed on the threaded runtime.
#[derive(Debug)]
pub struct ThreadedQueryHandle {
    /// Registered task states for all partitions in a query.
    pub(crate) states: Mutex<Vec<Arc<TaskState>>>,
    pub(crate) errors: Arc<dyn ErrorSink>,
}

impl QueryHandle for ThreadedQueryHandle {
    /// Cancel the query.
    fn cancel(&self) {
        self.errors.set_error(DbError::cancelled());

        let states = self.states.lock();

        for state in states.iter() {
            let mut partition = state.partition.lock();
            partition.query_canceled = true;
            std::mem::drop(partition);

            // Execute the task again so it picks up the set bool. This lets
            // us cancel the partition regardless of if it's pending.
            state.wake_by_ref();
        }
    }
}
