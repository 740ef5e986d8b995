//! Order preserving k-way merge.
//!
//! Each partition writes into its own bounded buffer. The merge keeps the
//! front element of every partition and repeatedly emits the one with the
//! smallest key, tracking fronts in a binary min-heap of partition indices.
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use parstream_error::Result;
use tracing::trace;

use super::buffer::PartitionBuffer;
use super::state::QueryState;
use crate::partition::comparer::KeyComparer;

/// Merges partition buffers into a single sequence ordered by key.
pub(crate) struct OrderedMerge<U, K> {
    buffers: Vec<Arc<PartitionBuffer<U, K>>>,
    /// Front element for each partition. None once a partition is exhausted.
    fronts: Vec<Option<(U, K)>>,
    /// Min-heap of partitions with a front element.
    heap: Vec<usize>,
    comparer: Arc<dyn KeyComparer<K>>,
    state: Arc<QueryState>,
    primed: bool,
    done: bool,
}

impl<U, K> OrderedMerge<U, K> {
    pub(crate) fn new(
        buffers: Vec<Arc<PartitionBuffer<U, K>>>,
        comparer: Arc<dyn KeyComparer<K>>,
        state: Arc<QueryState>,
    ) -> Self {
        OrderedMerge {
            fronts: Vec::with_capacity(buffers.len()),
            heap: Vec::with_capacity(buffers.len()),
            buffers,
            comparer,
            state,
            primed: false,
            done: false,
        }
    }

    /// Check if the front of partition `a` sorts before the front of `b`.
    ///
    /// Equal keys are ordered by partition index.
    fn front_less(&self, a: usize, b: usize) -> bool {
        let (Some((_, key_a)), Some((_, key_b))) = (&self.fronts[a], &self.fronts[b]) else {
            return false;
        };
        match self.comparer.compare(key_a, key_b) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => a < b,
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                return;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && self.front_less(self.heap[right], self.heap[left]) {
                child = right;
            }
            if !self.front_less(self.heap[child], self.heap[pos]) {
                return;
            }
            self.heap.swap(pos, child);
            pos = child;
        }
    }

    fn build_heap(&mut self) {
        self.heap = (0..self.fronts.len())
            .filter(|&idx| self.fronts[idx].is_some())
            .collect();
        for pos in (0..self.heap.len() / 2).rev() {
            self.sift_down(pos);
        }
    }

    /// Stop all workers, wait for them to finish, and produce the final
    /// error if any.
    fn finish(&mut self) -> Option<Result<U>> {
        self.done = true;
        self.state.stop();
        for buffer in &self.buffers {
            buffer.abandon();
        }
        self.fronts.clear();
        self.heap.clear();
        self.state.wait_all_finished();

        trace!("ordered merge finished");

        self.state.take_outcome().map(Err)
    }
}

impl<U, K> Iterator for OrderedMerge<U, K> {
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.primed {
            self.primed = true;
            for buffer in &self.buffers {
                let front = buffer.pop_blocking();
                self.fronts.push(front);
            }
            self.build_heap();
        }

        if self.state.should_stop() {
            return self.finish();
        }

        let Some(&idx) = self.heap.first() else {
            return self.finish();
        };

        let (item, _) = self.fronts[idx].take()?;
        self.fronts[idx] = self.buffers[idx].pop_blocking();
        if self.fronts[idx].is_none() {
            self.heap.swap_remove(0);
        }
        self.sift_down(0);

        Some(Ok(item))
    }
}

impl<U, K> Drop for OrderedMerge<U, K> {
    fn drop(&mut self) {
        if !self.done {
            // Abandoned before completion, let the workers wind down on their
            // own.
            self.state.stop();
            for buffer in &self.buffers {
                buffer.abandon();
            }
        }
    }
}

impl<U, K> fmt::Debug for OrderedMerge<U, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMerge")
            .field("partitions", &self.buffers.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;
    use crate::exchange::state::CancellationSignal;
    use crate::exchange::worker::PartitionOutput;
    use crate::partition::comparer::{NaturalOrder, ReverseOrder};

    fn filled_buffer(items: &[(i32, usize)], capacity: usize) -> Arc<PartitionBuffer<i32, usize>> {
        let buffer = Arc::new(PartitionBuffer::new(capacity));
        for &(item, key) in items {
            buffer.push(item, key);
        }
        buffer.finish();
        buffer
    }

    #[test]
    fn merge_prefilled_buffers() {
        let buffers = vec![
            filled_buffer(&[(10, 0), (40, 3)], 4),
            filled_buffer(&[(20, 1), (50, 4)], 4),
            filled_buffer(&[(30, 2)], 4),
            filled_buffer(&[], 4),
        ];
        let state = Arc::new(QueryState::new(CancellationSignal::new(), 4));
        for _ in 0..4 {
            state.partition_finished();
        }

        let merge = OrderedMerge::new(buffers, Arc::new(NaturalOrder), state);
        let out: Vec<_> = merge.map(|r| r.unwrap()).collect();
        assert_eq!(vec![10, 20, 30, 40, 50], out);
    }

    #[test]
    fn merge_with_reverse_comparer() {
        let buffers = vec![
            filled_buffer(&[(5, 5), (3, 3)], 2),
            filled_buffer(&[(4, 4), (1, 1)], 2),
            filled_buffer(&[(2, 2)], 2),
        ];
        let state = Arc::new(QueryState::new(CancellationSignal::new(), 3));
        for _ in 0..3 {
            state.partition_finished();
        }

        let merge = OrderedMerge::new(buffers, Arc::new(ReverseOrder(NaturalOrder)), state);
        let out: Vec<_> = merge.map(|r| r.unwrap()).collect();
        assert_eq!(vec![5, 4, 3, 2, 1], out);
    }

    #[test]
    fn merge_surfaces_cancellation() {
        let signal = CancellationSignal::new();
        let buffers = vec![filled_buffer(&[(1, 0), (2, 1), (3, 2)], 4)];
        let state = Arc::new(QueryState::new(signal.clone(), 1));
        state.partition_finished();

        let mut merge = OrderedMerge::new(buffers, Arc::new(NaturalOrder), state);
        assert_eq!(1, merge.next().unwrap().unwrap());

        signal.cancel();
        let err = merge.next().unwrap().unwrap_err();
        assert_eq!(parstream_error::ErrorKind::Cancelled, err.kind());
        assert!(merge.next().is_none());
    }

    #[test]
    fn merge_many_partitions_interleaved() {
        const PARTITIONS: usize = 64;
        const PER_PARTITION: usize = 50;

        // Partition p holds keys p, p+64, p+128, ... with a few duplicates of
        // the previous key to check ties.
        let mut rng = rand::rng();
        let mut expected = Vec::new();
        let buffers: Vec<_> = (0..PARTITIONS)
            .map(|p| {
                let mut items = Vec::new();
                for i in 0..PER_PARTITION {
                    let key = p + i * PARTITIONS;
                    items.push(((p * 1000 + i) as i32, key));
                    expected.push((key, p, (p * 1000 + i) as i32));
                }
                if rng.random_bool(0.25) {
                    let key = p + (PER_PARTITION - 1) * PARTITIONS;
                    items.push((-(p as i32), key));
                    expected.push((key, p, -(p as i32)));
                }
                filled_buffer(&items, items.len())
            })
            .collect();

        let state = Arc::new(QueryState::new(CancellationSignal::new(), PARTITIONS));
        for _ in 0..PARTITIONS {
            state.partition_finished();
        }

        expected.sort_by_key(|&(key, partition, _)| (key, partition));
        let expected: Vec<_> = expected.into_iter().map(|(_, _, item)| item).collect();

        let merge = OrderedMerge::new(buffers, Arc::new(NaturalOrder), state);
        let out: Vec<_> = merge.map(|r| r.unwrap()).collect();
        assert_eq!(expected, out);
    }

    #[test]
    fn equal_keys_emitted_by_partition() {
        let buffers = vec![
            filled_buffer(&[(3, 1)], 2),
            filled_buffer(&[(1, 0), (4, 1)], 2),
            filled_buffer(&[(2, 0)], 2),
        ];
        let state = Arc::new(QueryState::new(CancellationSignal::new(), 3));
        for _ in 0..3 {
            state.partition_finished();
        }

        let merge = OrderedMerge::new(buffers, Arc::new(NaturalOrder), state);
        let out: Vec<_> = merge.map(|r| r.unwrap()).collect();
        assert_eq!(vec![1, 2, 3, 4], out);
    }
}
