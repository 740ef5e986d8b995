use super::comparer::OrderKey;
use super::stream::PartitionedStream;

/// A consumer of partitioned streams.
///
/// The producer of a partitioned stream decides the concrete key type and
/// calls `receive` with it. The recipient is written once, generically over
/// any key type, and never names the key type outside of `receive`.
pub trait PartitionedStreamRecipient<T> {
    type Output;

    fn receive<K: OrderKey>(self, stream: PartitionedStream<T, K>) -> Self::Output;
}
