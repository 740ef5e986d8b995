use std::fmt;
use std::sync::Arc;

use parstream_error::{DbError, Result};

use super::QueryResults;
use crate::partition::indexed::{IndexedSource, partition_data_source};
use crate::partition::recipient::PartitionedStreamRecipient;
use crate::partition::stream::PartitionedStream;

/// Query results over a randomly accessible source.
///
/// Partitioned streams produced from this are keyed by source index.
pub struct ListQueryResults<S> {
    source: Arc<S>,
    partitions: usize,
    use_striping: bool,
}

impl<S> ListQueryResults<S>
where
    S: IndexedSource,
{
    /// Create new list query results.
    ///
    /// Errors if `partitions` is zero.
    pub fn try_new(source: Arc<S>, partitions: usize, use_striping: bool) -> Result<Self> {
        if partitions == 0 {
            return Err(DbError::invalid_argument(
                "Partition count must be greater than zero",
            ));
        }

        Ok(ListQueryResults {
            source,
            partitions,
            use_striping,
        })
    }

    pub fn get_partitioned_stream(&self) -> Result<PartitionedStream<S::Item, usize>> {
        partition_data_source(self.source.clone(), self.partitions, self.use_striping)
    }
}

impl<S> fmt::Debug for ListQueryResults<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListQueryResults")
            .field("partitions", &self.partitions)
            .field("use_striping", &self.use_striping)
            .finish_non_exhaustive()
    }
}

impl<S> QueryResults<S::Item> for ListQueryResults<S>
where
    S: IndexedSource,
{
    fn give_partitioned_stream<R>(&self, recipient: R) -> Result<R::Output>
    where
        R: PartitionedStreamRecipient<S::Item>,
    {
        let stream = self.get_partitioned_stream()?;
        Ok(recipient.receive::<usize>(stream))
    }

    fn is_indexible(&self) -> bool {
        true
    }

    fn elements_count(&self) -> Result<usize> {
        Ok(self.source.count())
    }

    fn get_element(&self, index: usize) -> Result<S::Item> {
        let count = self.source.count();
        if index >= count {
            return Err(DbError::index_out_of_range(index, count));
        }
        Ok(self.source.element_at(index))
    }
}
