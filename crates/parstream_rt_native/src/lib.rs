//! Implementation of the partition runtime using native threads and thread
//! pools.
pub mod runtime;
pub mod threaded;
