//! Partitioning for randomly accessible sources.
//!
//! Two strategies are supported:
//!
//! - Contiguous ranges: each partition owns a run of consecutive indices.
//!   Cheap to merge and cache friendly, but sensitive to position-dependent
//!   processing cost.
//! - Striping: partition `i` owns `i, i+P, i+2P, ...`. Spreads elements of
//!   varying cost evenly across partitions at the cost of locality.
//!
//! In both cases the order key of an element is its index in the source.
use std::iter::StepBy;
use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::Arc;

use parstream_error::{DbError, Result};
use tracing::trace;

use super::comparer::NaturalOrder;
use super::stream::{Partition, PartitionedStream};

/// A read-only, randomly accessible source with a known number of elements.
///
/// The source must not change while a query reading from it is in flight.
pub trait IndexedSource: Sync + Send + 'static {
    type Item: Send + 'static;

    fn count(&self) -> usize;

    /// Get the element at `idx`.
    ///
    /// Callers guarantee `idx < self.count()`.
    fn element_at(&self, idx: usize) -> Self::Item;
}

impl<T> IndexedSource for Vec<T>
where
    T: Clone + Sync + Send + 'static,
{
    type Item = T;

    fn count(&self) -> usize {
        self.len()
    }

    fn element_at(&self, idx: usize) -> Self::Item {
        self[idx].clone()
    }
}

impl<T> IndexedSource for Box<[T]>
where
    T: Clone + Sync + Send + 'static,
{
    type Item = T;

    fn count(&self) -> usize {
        self.len()
    }

    fn element_at(&self, idx: usize) -> Self::Item {
        self[idx].clone()
    }
}

/// The set of source indices owned by a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionIndices {
    /// Consecutive indices.
    Range(Range<usize>),
    /// Indices `start, start+step, ...` below `end`.
    Strided {
        start: usize,
        end: usize,
        step: NonZeroUsize,
    },
}

impl PartitionIndices {
    pub fn len(&self) -> usize {
        match self {
            Self::Range(range) => range.len(),
            Self::Strided { start, end, step } => {
                if start >= end {
                    0
                } else {
                    (end - start - 1) / step.get() + 1
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the indices in increasing order.
    pub fn iter(&self) -> StepBy<Range<usize>> {
        match self {
            Self::Range(range) => range.clone().step_by(1),
            Self::Strided { start, end, step } => (*start..*end).step_by(step.get()),
        }
    }
}

/// Compute the indices owned by each partition.
///
/// For contiguous partitioning, the remainder of `count / partitions` is
/// given to the earliest partitions, one extra index each.
pub fn partition_indices(
    count: usize,
    partitions: usize,
    use_striping: bool,
) -> Result<Vec<PartitionIndices>> {
    let Some(step) = NonZeroUsize::new(partitions) else {
        return Err(DbError::invalid_argument(
            "Partition count must be greater than zero",
        ));
    };

    if use_striping {
        let indices = (0..partitions)
            .map(|idx| PartitionIndices::Strided {
                start: idx,
                end: count,
                step,
            })
            .collect();
        return Ok(indices);
    }

    let base = count / partitions;
    let remainder = count % partitions;

    let indices = (0..partitions)
        .map(|idx| {
            let start = idx * base + idx.min(remainder);
            let len = base + usize::from(idx < remainder);
            PartitionIndices::Range(start..start + len)
        })
        .collect();

    Ok(indices)
}

/// Partition an indexed source into a partitioned stream keyed by source
/// index.
pub fn partition_data_source<S>(
    source: Arc<S>,
    partitions: usize,
    use_striping: bool,
) -> Result<PartitionedStream<S::Item, usize>>
where
    S: IndexedSource,
{
    let count = source.count();
    let indices = partition_indices(count, partitions, use_striping)?;

    trace!(%count, %partitions, %use_striping, "partitioning indexed source");

    let partitions = indices
        .into_iter()
        .enumerate()
        .map(|(partition_idx, indices)| {
            let source = source.clone();
            let producer = indices
                .iter()
                .map(move |idx| (source.element_at(idx), idx));
            Partition::new(partition_idx, Box::new(producer))
        })
        .collect();

    Ok(PartitionedStream::new(partitions, Arc::new(NaturalOrder)))
}
