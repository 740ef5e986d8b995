//! Unordered drain.
//!
//! Every worker writes into its own bounded buffer. The consumer takes
//! elements round-robin from whichever buffers have them, and only waits on
//! the shared consumer signal once every live buffer was found empty.
use std::fmt;
use std::sync::Arc;

use parstream_error::Result;
use tracing::trace;

use super::buffer::{BufferOutput, ConsumerSignal, PartitionBuffer, TryPop};
use super::state::QueryState;

/// Create the per-partition outputs and the drain reading from them.
pub(crate) fn unordered_exchange<U, K>(
    partitions: usize,
    buffer_size: usize,
    state: Arc<QueryState>,
) -> (Vec<BufferOutput<U, K>>, UnorderedDrain<U, K>) {
    let signal = Arc::new(ConsumerSignal::new());
    let buffers: Vec<_> = (0..partitions)
        .map(|_| Arc::new(PartitionBuffer::with_signal(buffer_size, signal.clone())))
        .collect();
    let outputs = buffers
        .iter()
        .map(|buffer| BufferOutput(buffer.clone()))
        .collect();

    (outputs, UnorderedDrain::new(buffers, signal, state))
}

/// Emits elements from all partitions as they're produced. Order keys are
/// dropped.
pub(crate) struct UnorderedDrain<U, K> {
    buffers: Vec<Arc<PartitionBuffer<U, K>>>,
    signal: Arc<ConsumerSignal>,
    /// Indices of buffers whose producer hasn't finished.
    live: Vec<usize>,
    /// Position in `live` to resume scanning from.
    cursor: usize,
    state: Arc<QueryState>,
    done: bool,
}

impl<U, K> UnorderedDrain<U, K> {
    fn new(
        buffers: Vec<Arc<PartitionBuffer<U, K>>>,
        signal: Arc<ConsumerSignal>,
        state: Arc<QueryState>,
    ) -> Self {
        UnorderedDrain {
            live: (0..buffers.len()).collect(),
            buffers,
            signal,
            cursor: 0,
            state,
            done: false,
        }
    }

    /// Take the next available element from any live buffer without
    /// blocking, dropping buffers that finished along the way.
    fn scan(&mut self) -> Option<U> {
        let mut checked = 0;
        while checked < self.live.len() {
            let pos = self.cursor % self.live.len();
            match self.buffers[self.live[pos]].try_pop() {
                TryPop::Item((item, _)) => {
                    self.cursor = pos + 1;
                    return Some(item);
                }
                TryPop::Empty => {
                    self.cursor = pos + 1;
                    checked += 1;
                }
                TryPop::Finished => {
                    self.live.swap_remove(pos);
                    self.cursor = pos;
                }
            }
        }
        None
    }

    /// Get the next element, blocking until one is produced.
    ///
    /// Returns None once every buffer finished or the query should stop.
    fn next_element(&mut self) -> Option<U> {
        let signal = self.signal.clone();
        loop {
            if self.state.should_stop() {
                return None;
            }

            if let Some(item) = self.scan() {
                return Some(item);
            }
            if self.live.is_empty() {
                return None;
            }

            let mut guard = signal.prepare_wait();
            let found = self.scan();
            if found.is_none() && !self.live.is_empty() && !self.state.should_stop() {
                signal.wait(&mut guard);
            }
            signal.done_waiting();
            std::mem::drop(guard);

            if found.is_some() {
                return found;
            }
        }
    }

    fn finish(&mut self) -> Option<Result<U>> {
        self.done = true;
        self.state.stop();
        for buffer in &self.buffers {
            buffer.abandon();
        }
        self.state.wait_all_finished();

        trace!("unordered drain finished");

        self.state.take_outcome().map(Err)
    }
}

impl<U, K> Iterator for UnorderedDrain<U, K> {
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_element() {
            Some(item) => Some(Ok(item)),
            None => self.finish(),
        }
    }
}

impl<U, K> Drop for UnorderedDrain<U, K> {
    fn drop(&mut self) {
        if !self.done {
            self.state.stop();
            for buffer in &self.buffers {
                buffer.abandon();
            }
        }
    }
}

impl<U, K> fmt::Debug for UnorderedDrain<U, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnorderedDrain")
            .field("partitions", &self.buffers.len())
            .field("live", &self.live.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
