use std::fmt;
use std::sync::Arc;

use super::comparer::KeyComparer;

/// Forward-only producer of elements and their order keys.
pub type PartitionProducer<T, K> = Box<dyn Iterator<Item = (T, K)> + Send>;

/// A single partition of a partitioned stream.
///
/// Produces elements tagged with order keys. Keys produced by a single
/// partition are strictly increasing according to the stream's comparer.
///
/// A partition can be pulled once. Moving it into a worker consumes it.
pub struct Partition<T, K> {
    idx: usize,
    producer: PartitionProducer<T, K>,
}

impl<T, K> Partition<T, K> {
    pub fn new(idx: usize, producer: PartitionProducer<T, K>) -> Self {
        Partition { idx, producer }
    }

    pub fn partition_idx(&self) -> usize {
        self.idx
    }
}

impl<T, K> Iterator for Partition<T, K> {
    type Item = (T, K);

    fn next(&mut self) -> Option<Self::Item> {
        self.producer.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.producer.size_hint()
    }
}

impl<T, K> fmt::Debug for Partition<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("idx", &self.idx)
            .finish_non_exhaustive()
    }
}

/// An ordered collection of independent partitions sharing a single key
/// type and key comparer.
///
/// Immutable once constructed. Consumers take ownership of the partitions
/// through `into_parts`.
pub struct PartitionedStream<T, K> {
    partitions: Vec<Partition<T, K>>,
    comparer: Arc<dyn KeyComparer<K>>,
}

impl<T, K> PartitionedStream<T, K> {
    /// Create a new partitioned stream.
    ///
    /// Partitions must be ordered by their partition index.
    pub fn new(partitions: Vec<Partition<T, K>>, comparer: Arc<dyn KeyComparer<K>>) -> Self {
        debug_assert!(
            partitions
                .iter()
                .enumerate()
                .all(|(idx, p)| p.partition_idx() == idx),
            "partitions out of order"
        );

        PartitionedStream {
            partitions,
            comparer,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn comparer(&self) -> &Arc<dyn KeyComparer<K>> {
        &self.comparer
    }

    pub fn into_parts(self) -> (Vec<Partition<T, K>>, Arc<dyn KeyComparer<K>>) {
        (self.partitions, self.comparer)
    }
}

impl<T, K> fmt::Debug for PartitionedStream<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionedStream")
            .field("partitions", &self.partitions)
            .field("comparer", &self.comparer)
            .finish()
    }
}
