//! Chunk partitioning for sources that can only be enumerated.
//!
//! All partitions share a single enumerator. A partition that runs out of
//! local elements locks the enumerator and takes the next chunk of up to
//! `chunk_size` elements, tagging each with its ordinal position in the
//! enumeration. Ordinals are unique across partitions and strictly
//! increasing within one, so merging by ordinal restores enumeration order.
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use parstream_error::{DbError, Result};
use tracing::trace;

use super::comparer::NaturalOrder;
use super::stream::{Partition, PartitionedStream};

struct SharedEnumerator<I> {
    iter: I,
    /// Ordinal of the next element to be read.
    next_ordinal: u64,
    /// Set once the enumerator returns None, avoids polling it again.
    exhausted: bool,
}

struct ChunkPartition<I: Iterator> {
    shared: Arc<Mutex<SharedEnumerator<I>>>,
    chunk: VecDeque<(I::Item, u64)>,
    chunk_size: usize,
}

impl<I> ChunkPartition<I>
where
    I: Iterator,
{
    fn fill_chunk(&mut self) {
        let mut shared = self.shared.lock();
        if shared.exhausted {
            return;
        }

        while self.chunk.len() < self.chunk_size {
            match shared.iter.next() {
                Some(item) => {
                    let ordinal = shared.next_ordinal;
                    shared.next_ordinal += 1;
                    self.chunk.push_back((item, ordinal));
                }
                None => {
                    shared.exhausted = true;
                    break;
                }
            }
        }
    }
}

impl<I> Iterator for ChunkPartition<I>
where
    I: Iterator,
{
    type Item = (I::Item, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk.is_empty() {
            self.fill_chunk();
        }
        self.chunk.pop_front()
    }
}

/// Partition an enumerable source using chunk partitioning.
pub fn partition_enumerator<I>(
    iter: I,
    partitions: usize,
    chunk_size: usize,
) -> Result<PartitionedStream<I::Item, u64>>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    if partitions == 0 {
        return Err(DbError::invalid_argument(
            "Partition count must be greater than zero",
        ));
    }
    if chunk_size == 0 {
        return Err(DbError::invalid_argument(
            "Chunk size must be greater than zero",
        ));
    }

    trace!(%partitions, %chunk_size, "chunk partitioning enumerator");

    let shared = Arc::new(Mutex::new(SharedEnumerator {
        iter,
        next_ordinal: 0,
        exhausted: false,
    }));

    let partitions = (0..partitions)
        .map(|idx| {
            let producer = ChunkPartition {
                shared: shared.clone(),
                chunk: VecDeque::with_capacity(chunk_size),
                chunk_size,
            };
            Partition::new(idx, Box::new(producer))
        })
        .collect();

    Ok(PartitionedStream::new(partitions, Arc::new(NaturalOrder)))
}

#[cfg(test)]
mod tests {
    use parstream_error::ErrorKind;

    use super::*;

    #[test]
    fn invalid_configuration() {
        let err = partition_enumerator(0..10, 0, 4).unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());

        let err = partition_enumerator(0..10, 2, 0).unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());
    }

    #[test]
    fn interleaved_pulls_take_chunks() {
        let stream = partition_enumerator(0..10, 2, 3).unwrap();
        let (mut partitions, _) = stream.into_parts();
        let mut p1 = partitions.pop().unwrap();
        let mut p0 = partitions.pop().unwrap();

        assert_eq!(Some((0, 0)), p0.next());
        assert_eq!(Some((3, 3)), p1.next());
        assert_eq!(Some((1, 1)), p0.next());
        assert_eq!(Some((2, 2)), p0.next());
        // Local chunk exhausted, takes the next chunk after p1's.
        assert_eq!(Some((6, 6)), p0.next());

        let rest_p1: Vec<_> = p1.collect();
        assert_eq!(vec![(4, 4), (5, 5), (9, 9)], rest_p1);

        let rest_p0: Vec<_> = p0.collect();
        assert_eq!(vec![(7, 7), (8, 8)], rest_p0);
    }

    #[test]
    fn ordinals_cover_all_elements() {
        let stream = partition_enumerator((0..1000).map(|v| v * 2), 7, 16).unwrap();
        let (partitions, _) = stream.into_parts();

        let mut all = Vec::new();
        for partition in partitions {
            let pairs: Vec<_> = partition.collect();
            assert!(pairs.windows(2).all(|w| w[0].1 < w[1].1));
            all.extend(pairs);
        }

        all.sort_by_key(|(_, ord)| *ord);
        let values: Vec<_> = all.into_iter().map(|(v, _)| v).collect();
        assert_eq!((0..1000).map(|v| v * 2).collect::<Vec<_>>(), values);
    }

    #[test]
    fn empty_enumerator() {
        let stream = partition_enumerator(std::iter::empty::<u8>(), 3, 8).unwrap();
        let (partitions, _) = stream.into_parts();
        for mut partition in partitions {
            assert!(partition.next().is_none());
        }
    }
}
