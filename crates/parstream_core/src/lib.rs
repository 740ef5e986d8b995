//! Partitioned-stream execution substrate.
//!
//! Sources are split into partitions whose elements carry an order key.
//! Partitions are handed to consumers through a double dispatch
//! ([`QueryResults`](query_results::QueryResults) gives a
//! [`PartitionedStream`](partition::stream::PartitionedStream) to a
//! [`PartitionedStreamRecipient`](partition::recipient::PartitionedStreamRecipient)),
//! letting the producer pick the key type while the consumer stays generic.
//!
//! The exchange consumes partitions either unordered or through an
//! order-preserving k-way merge.
pub mod config;
pub mod engine;
pub mod exchange;
pub mod partition;
pub mod query_results;
pub mod runtime;
