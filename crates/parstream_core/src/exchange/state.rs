use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use parstream_error::{DbError, ErrorKind};
use tracing::{debug, warn};

use crate::runtime::ErrorSink;

/// Shared cancellation flag for a query.
///
/// Workers check it between elements.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// State shared between the workers of a query and its consumer.
#[derive(Debug)]
pub(crate) struct QueryState {
    cancel: CancellationSignal,
    /// Set when cancellation has been observed by a worker or the consumer.
    cancel_observed: AtomicBool,
    /// Set on worker fault or when the consumer abandons the query.
    stopped: AtomicBool,
    faults: Mutex<Vec<DbError>>,
    /// Number of partitions that haven't finished yet.
    remaining: Mutex<usize>,
    all_finished: Condvar,
}

impl QueryState {
    pub(crate) fn new(cancel: CancellationSignal, partitions: usize) -> Self {
        QueryState {
            cancel,
            cancel_observed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            faults: Mutex::new(Vec::new()),
            remaining: Mutex::new(partitions),
            all_finished: Condvar::new(),
        }
    }

    /// Check if execution should stop at the current element boundary.
    pub(crate) fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            self.cancel_observed.store(true, Ordering::Release);
            return true;
        }
        self.stopped.load(Ordering::Acquire)
    }

    /// Stop all workers at their next element boundary.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn partition_finished(&self) {
        let mut remaining = self.remaining.lock();
        *remaining -= 1;
        if *remaining == 0 {
            self.all_finished.notify_all();
        }
    }

    /// Block until every partition has finished.
    pub(crate) fn wait_all_finished(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.all_finished.wait(&mut remaining);
        }
    }

    /// Get the error to surface to the consumer, if any.
    ///
    /// Worker faults take precedence over cancellation. Multiple faults are
    /// combined into a single aggregate error ordered by partition.
    pub(crate) fn take_outcome(&self) -> Option<DbError> {
        let mut faults = std::mem::take(&mut *self.faults.lock());
        if !faults.is_empty() {
            faults.sort_by_key(|err| {
                err.get_field("partition")
                    .and_then(|p| p.parse::<usize>().ok())
            });
            return Some(DbError::aggregate(faults));
        }

        if self.cancel_observed.load(Ordering::Acquire) {
            return Some(DbError::cancelled());
        }

        None
    }
}

impl ErrorSink for QueryState {
    fn set_error(&self, error: DbError) {
        if error.kind() == ErrorKind::Cancelled {
            debug!("query canceled");
            self.cancel.cancel();
            self.cancel_observed.store(true, Ordering::Release);
            return;
        }

        warn!(%error, "partition worker failed");
        self.faults.lock().push(error);
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_outcome_on_success() {
        let state = QueryState::new(CancellationSignal::new(), 2);
        state.partition_finished();
        state.partition_finished();
        state.wait_all_finished();
        assert!(state.take_outcome().is_none());
    }

    #[test]
    fn cancellation_observed() {
        let signal = CancellationSignal::new();
        let state = QueryState::new(signal.clone(), 1);
        assert!(!state.should_stop());

        signal.cancel();
        assert!(state.should_stop());
        assert_eq!(ErrorKind::Cancelled, state.take_outcome().unwrap().kind());
    }

    #[test]
    fn cancellation_through_sink() {
        let signal = CancellationSignal::new();
        let state = QueryState::new(signal.clone(), 1);
        state.set_error(DbError::cancelled());

        assert!(signal.is_cancelled());
        assert_eq!(ErrorKind::Cancelled, state.take_outcome().unwrap().kind());
    }

    #[test]
    fn faults_take_precedence_and_aggregate() {
        let signal = CancellationSignal::new();
        let state = QueryState::new(signal.clone(), 3);
        state.set_error(DbError::worker_fault(2, DbError::new("c")));
        state.set_error(DbError::worker_fault(0, DbError::new("a")));
        signal.cancel();
        assert!(state.should_stop());

        let err = state.take_outcome().unwrap();
        assert_eq!(ErrorKind::Aggregate, err.kind());
        let partitions: Vec<_> = err
            .causes()
            .iter()
            .map(|c| c.get_field("partition").unwrap())
            .collect();
        assert_eq!(vec!["0", "2"], partitions);
    }

    #[test]
    fn single_fault_stops_siblings() {
        let state = QueryState::new(CancellationSignal::new(), 2);
        state.set_error(DbError::worker_fault(1, DbError::new("boom")));
        assert!(state.should_stop());
        assert_eq!(ErrorKind::WorkerFault, state.take_outcome().unwrap().kind());
    }
}
