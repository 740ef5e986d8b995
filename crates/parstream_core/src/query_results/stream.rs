use std::fmt;

use parking_lot::Mutex;
use parstream_error::{DbError, Result};

use super::QueryResults;
use crate::partition::chunked::partition_enumerator;
use crate::partition::recipient::PartitionedStreamRecipient;

/// Query results over a source that can only be enumerated once.
///
/// Not indexible. Partitions are fed from the shared enumerator using chunk
/// partitioning, and keyed by the ordinal position of each element.
pub struct StreamQueryResults<I> {
    /// The enumerator, taken when the partitioned stream is given.
    iter: Mutex<Option<I>>,
    partitions: usize,
    chunk_size: usize,
}

impl<I> StreamQueryResults<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    pub fn try_new(iter: I, partitions: usize, chunk_size: usize) -> Result<Self> {
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

        Ok(StreamQueryResults {
            iter: Mutex::new(Some(iter)),
            partitions,
            chunk_size,
        })
    }
}

impl<I> fmt::Debug for StreamQueryResults<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamQueryResults")
            .field("partitions", &self.partitions)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<I> QueryResults<I::Item> for StreamQueryResults<I>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    fn give_partitioned_stream<R>(&self, recipient: R) -> Result<R::Output>
    where
        R: PartitionedStreamRecipient<I::Item>,
    {
        let iter = self.iter.lock().take().ok_or_else(|| {
            DbError::invalid_operation("Partitioned stream already given for stream query results")
        })?;

        let stream = partition_enumerator(iter, self.partitions, self.chunk_size)?;
        Ok(recipient.receive::<u64>(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::any::type_name;

    use parstream_error::ErrorKind;

    use super::*;
    use crate::partition::comparer::OrderKey;
    use crate::partition::stream::PartitionedStream;

    /// Collects all (element, key) pairs along with the key type name.
    struct PairsRecipient;

    impl<T> PartitionedStreamRecipient<T> for PairsRecipient {
        type Output = (&'static str, usize, usize);

        fn receive<K: OrderKey>(self, stream: PartitionedStream<T, K>) -> Self::Output {
            let partition_count = stream.partition_count();
            let (partitions, _) = stream.into_parts();
            let total = partitions.into_iter().map(|p| p.count()).sum();
            (type_name::<K>(), partition_count, total)
        }
    }

    #[test]
    fn not_indexible() {
        let results = StreamQueryResults::try_new(0..5, 2, 2).unwrap();
        assert!(!results.is_indexible());

        let err = results.elements_count().unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());

        let err = results.get_element(0).unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }

    #[test]
    fn gives_ordinal_keyed_stream_once() {
        let results = StreamQueryResults::try_new(0..50, 4, 8).unwrap();

        let (key_type, partitions, total) =
            results.give_partitioned_stream(PairsRecipient).unwrap();
        assert_eq!(type_name::<u64>(), key_type);
        assert_eq!(4, partitions);
        assert_eq!(50, total);

        let err = results.give_partitioned_stream(PairsRecipient).unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }

    #[test]
    fn invalid_configuration() {
        let err = StreamQueryResults::try_new(0..5, 0, 2).unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());

        let err = StreamQueryResults::try_new(0..5, 2, 0).unwrap_err();
        assert_eq!(ErrorKind::InvalidArgument, err.kind());
    }
}
