//! Producers of partitioned streams.
//!
//! A query results node wraps a source along with its partitioning
//! configuration. Indexible producers additionally answer random access
//! requests without materializing the source.
pub mod list;
pub mod stream;

use std::fmt::Debug;

use parstream_error::{DbError, Result};

use crate::partition::recipient::PartitionedStreamRecipient;

pub trait QueryResults<T>: Debug + Sync + Send {
    /// Build a partitioned stream and give it to the recipient.
    ///
    /// The producer selects the key type of the stream, the recipient
    /// consumes it generically.
    fn give_partitioned_stream<R>(&self, recipient: R) -> Result<R::Output>
    where
        R: PartitionedStreamRecipient<T>;

    /// If elements can be accessed by index in constant time.
    fn is_indexible(&self) -> bool {
        false
    }

    /// Total number of elements.
    ///
    /// Errors if this producer isn't indexible.
    fn elements_count(&self) -> Result<usize> {
        Err(DbError::invalid_operation(
            "Cannot get element count for non-indexible query results",
        ))
    }

    /// Get the element at `index`.
    ///
    /// Errors if this producer isn't indexible, or if index is out of range.
    fn get_element(&self, index: usize) -> Result<T> {
        Err(DbError::invalid_operation(format!(
            "Cannot get element {index} from non-indexible query results"
        )))
    }
}
