use std::collections::HashMap;
use std::sync::LazyLock;

use parstream_error::{DbError, Result};

use super::dop::{select_degree_of_parallelism, validate_partitions};
use crate::exchange::ExchangeMode;
use crate::runtime::PartitionRuntime;

pub const DEFAULT_MERGE_BUFFER_SIZE: usize = 64;
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Configuration for executing queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Number of partitions (and workers) used for a query.
    pub partitions: usize,
    /// Stripe indices across partitions instead of using contiguous ranges.
    pub use_striping: bool,
    /// Merge partitions by order key to reproduce source order.
    pub preserve_order: bool,
    /// Per-partition buffer capacity between workers and the consumer.
    pub merge_buffer_size: usize,
    /// Elements taken per chunk when partitioning non-indexible sources.
    pub chunk_size: usize,
}

impl ExecutionConfig {
    pub fn new<R>(runtime: &R) -> Self
    where
        R: PartitionRuntime,
    {
        // Clamped, only errors for explicit requests.
        let partitions =
            select_degree_of_parallelism(None, runtime.default_partitions()).unwrap_or(1);

        ExecutionConfig {
            partitions,
            use_striping: false,
            preserve_order: true,
            merge_buffer_size: DEFAULT_MERGE_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn exchange_mode(&self) -> ExchangeMode {
        let buffer_size = self.merge_buffer_size;
        if self.preserve_order {
            ExchangeMode::OrderedMerge { buffer_size }
        } else {
            ExchangeMode::Unordered { buffer_size }
        }
    }

    pub fn set_from_str(&mut self, name: &str, value: &str) -> Result<()> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::invalid_argument(format!("Missing setting for '{name}'")))?;

        (func.set)(value, self)
    }

    pub fn get_as_string(&self, name: &str) -> Result<String> {
        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::invalid_argument(format!("Missing setting for '{name}'")))?;

        Ok((func.get)(self))
    }

    pub fn reset<R>(&mut self, name: &str, runtime: &R) -> Result<()>
    where
        R: PartitionRuntime,
    {
        let def_conf = Self::new(runtime);

        let func = GET_SET_FUNCTIONS
            .get(name)
            .ok_or_else(|| DbError::invalid_argument(format!("Missing setting for '{name}'")))?;

        let value = (func.get)(&def_conf);
        (func.set)(&value, self)
    }

    /// Names and descriptions of all settings.
    pub fn settings() -> impl Iterator<Item = (&'static str, &'static str)> {
        GET_SET_FUNCTIONS
            .iter()
            .map(|(name, funcs)| (*name, funcs.description))
    }
}

struct SettingFunctions {
    set: fn(value: &str, conf: &mut ExecutionConfig) -> Result<()>,
    get: fn(conf: &ExecutionConfig) -> String,
    description: &'static str,
}

impl SettingFunctions {
    const fn new<S: ExecutionSetting>() -> Self {
        SettingFunctions {
            set: S::set_from_str as _,
            get: S::get_as_string as _,
            description: S::DESCRIPTION,
        }
    }
}

fn insert_setting<S: ExecutionSetting>(map: &mut HashMap<&'static str, SettingFunctions>) {
    if map.insert(S::NAME, SettingFunctions::new::<S>()).is_some() {
        panic!("Duplicate settings names: {}", S::NAME);
    }
}

static GET_SET_FUNCTIONS: LazyLock<HashMap<&'static str, SettingFunctions>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    insert_setting::<Partitions>(&mut map);
    insert_setting::<UseStriping>(&mut map);
    insert_setting::<PreserveOrder>(&mut map);
    insert_setting::<MergeBufferSize>(&mut map);
    insert_setting::<ChunkSize>(&mut map);

    map
});

pub trait ExecutionSetting: Sync + Send + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()>;
    fn get_as_string(conf: &ExecutionConfig) -> String;
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "1" => Ok(true),
        "false" | "off" | "0" => Ok(false),
        other => Err(DbError::invalid_argument(format!(
            "Invalid boolean '{other}' for setting '{name}'"
        ))),
    }
}

fn parse_usize(name: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        DbError::invalid_argument(format!(
            "Invalid unsigned integer '{value}' for setting '{name}'"
        ))
    })
}

pub struct Partitions;

impl ExecutionSetting for Partitions {
    const NAME: &'static str = "partitions";
    const DESCRIPTION: &'static str = "Number of partitions to use during execution";

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()> {
        let val = parse_usize(Self::NAME, value)?;
        validate_partitions(val)?;
        conf.partitions = val;
        Ok(())
    }

    fn get_as_string(conf: &ExecutionConfig) -> String {
        conf.partitions.to_string()
    }
}

pub struct UseStriping;

impl ExecutionSetting for UseStriping {
    const NAME: &'static str = "use_striping";
    const DESCRIPTION: &'static str =
        "Assign source indices round-robin across partitions instead of contiguous ranges";

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()> {
        conf.use_striping = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &ExecutionConfig) -> String {
        conf.use_striping.to_string()
    }
}

pub struct PreserveOrder;

impl ExecutionSetting for PreserveOrder {
    const NAME: &'static str = "preserve_order";
    const DESCRIPTION: &'static str = "Merge partition outputs in source order";

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()> {
        conf.preserve_order = parse_bool(Self::NAME, value)?;
        Ok(())
    }

    fn get_as_string(conf: &ExecutionConfig) -> String {
        conf.preserve_order.to_string()
    }
}

const MIN_MERGE_BUFFER_SIZE: usize = 1;
const MAX_MERGE_BUFFER_SIZE: usize = 65536;

pub struct MergeBufferSize;

impl ExecutionSetting for MergeBufferSize {
    const NAME: &'static str = "merge_buffer_size";
    const DESCRIPTION: &'static str =
        "Number of elements each partition may buffer ahead of the consumer";

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()> {
        let val = parse_usize(Self::NAME, value)?;

        if val < MIN_MERGE_BUFFER_SIZE {
            return Err(DbError::invalid_argument(format!(
                "Merge buffer size cannot be less than {MIN_MERGE_BUFFER_SIZE}"
            )));
        }

        if val > MAX_MERGE_BUFFER_SIZE {
            return Err(DbError::invalid_argument(format!(
                "Merge buffer size cannot be greater than {MAX_MERGE_BUFFER_SIZE}"
            )));
        }

        conf.merge_buffer_size = val;
        Ok(())
    }

    fn get_as_string(conf: &ExecutionConfig) -> String {
        conf.merge_buffer_size.to_string()
    }
}

const MIN_CHUNK_SIZE: usize = 1;
const MAX_CHUNK_SIZE: usize = 8192;

pub struct ChunkSize;

impl ExecutionSetting for ChunkSize {
    const NAME: &'static str = "chunk_size";
    const DESCRIPTION: &'static str =
        "Number of elements a partition takes at a time from a non-indexible source";

    fn set_from_str(value: &str, conf: &mut ExecutionConfig) -> Result<()> {
        let val = parse_usize(Self::NAME, value)?;

        if val < MIN_CHUNK_SIZE {
            return Err(DbError::invalid_argument(format!(
                "Chunk size cannot be less than {MIN_CHUNK_SIZE}"
            )));
        }

        if val > MAX_CHUNK_SIZE {
            return Err(DbError::invalid_argument(format!(
                "Chunk size cannot be greater than {MAX_CHUNK_SIZE}"
            )));
        }

        conf.chunk_size = val;
        Ok(())
    }

    fn get_as_string(conf: &ExecutionConfig) -> String {
        conf.chunk_size.to_string()
    }
}
