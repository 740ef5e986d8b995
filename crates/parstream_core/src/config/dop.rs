use parstream_error::{DbError, Result};

pub const MIN_PARTITION_COUNT: usize = 1;
pub const MAX_PARTITION_COUNT: usize = 512;

/// Validate a partition count.
pub fn validate_partitions(partitions: usize) -> Result<()> {
    if partitions < MIN_PARTITION_COUNT {
        return Err(DbError::invalid_argument(format!(
            "Partition count cannot be less than {MIN_PARTITION_COUNT}"
        )));
    }

    if partitions > MAX_PARTITION_COUNT {
        return Err(DbError::invalid_argument(format!(
            "Partition count cannot be greater than {MAX_PARTITION_COUNT}"
        ))
        .with_field("partitions", partitions));
    }

    Ok(())
}

/// Select the degree of parallelism for a query.
///
/// An explicitly requested count is used as-is after validation. Otherwise
/// the available parallelism (e.g. number of threads in the runtime) is
/// used, capped to the max partition count.
pub fn select_degree_of_parallelism(requested: Option<usize>, available: usize) -> Result<usize> {
    match requested {
        Some(partitions) => {
            validate_partitions(partitions)?;
            Ok(partitions)
        }
        None => Ok(available.clamp(MIN_PARTITION_COUNT, MAX_PARTITION_COUNT)),
    }
}
