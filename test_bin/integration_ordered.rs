mod common;

use std::sync::Arc;

use common::new_engine;
use parstream_core::partition::comparer::{NaturalOrder, ReverseOrder};
use parstream_core::partition::indexed::{PartitionIndices, partition_indices};
use parstream_core::partition::recipient::PartitionedStreamRecipient;
use parstream_core::partition::stream::{Partition, PartitionedStream};
use parstream_core::query_results::QueryResults;
use parstream_error::{ErrorKind, Result};
use rand::Rng;

#[test]
fn ten_elements_three_partitions() {
    let indices = partition_indices(10, 3, false).unwrap();
    assert_eq!(
        vec![
            PartitionIndices::Range(0..4),
            PartitionIndices::Range(4..7),
            PartitionIndices::Range(7..10),
        ],
        indices
    );

    for striping in ["false", "true"] {
        let engine = new_engine(4, &[("partitions", "3"), ("use_striping", striping)]);
        let results = engine.from_vec((0..10).collect::<Vec<i32>>()).unwrap();

        let out = engine.execute(&results, Ok).unwrap();
        assert_eq!(3, out.partition_count());
        assert_eq!((0..10).collect::<Vec<_>>(), out.collect_vec().unwrap());
    }
}

#[test]
fn partition_keys_are_source_indices() {
    let engine = new_engine(2, &[("partitions", "3"), ("use_striping", "true")]);
    let results = engine.from_vec((100..110).collect::<Vec<i32>>()).unwrap();

    let (partitions, _) = results.get_partitioned_stream().unwrap().into_parts();
    let pulled: Vec<Vec<(i32, usize)>> = partitions.into_iter().map(|p| p.collect()).collect();

    assert_eq!(vec![(100, 0), (103, 3), (106, 6), (109, 9)], pulled[0]);
    assert_eq!(vec![(101, 1), (104, 4), (107, 7)], pulled[1]);
    assert_eq!(vec![(102, 2), (105, 5), (108, 8)], pulled[2]);
}

#[test]
fn round_trip_all_partition_counts() {
    const N: usize = 23;
    let source: Vec<usize> = (0..N).collect();

    for striping in ["false", "true"] {
        for partitions in 1..=(N + 5) {
            // Small buffers and fewer threads than partitions, workers must
            // park and get rescheduled to make progress.
            let engine = new_engine(
                2,
                &[
                    ("partitions", partitions.to_string().as_str()),
                    ("use_striping", striping),
                    ("merge_buffer_size", "1"),
                ],
            );
            let results = engine.from_vec(source.clone()).unwrap();
            let out = engine
                .execute(&results, |v| Ok(v * 3))
                .unwrap()
                .collect_vec()
                .unwrap();

            let expected: Vec<_> = source.iter().map(|v| v * 3).collect();
            assert_eq!(expected, out, "partitions: {partitions}, striping: {striping}");
        }
    }
}

#[test]
fn round_trip_random_sizes() {
    let mut rng = rand::rng();

    for _ in 0..20 {
        let count = rng.random_range(0..500);
        let partitions = rng.random_range(1..=16);
        let buffer_size = rng.random_range(1..=8);
        let striping = rng.random_bool(0.5);

        let engine = new_engine(
            3,
            &[
                ("partitions", partitions.to_string().as_str()),
                ("use_striping", striping.to_string().as_str()),
                ("merge_buffer_size", buffer_size.to_string().as_str()),
            ],
        );
        let source: Vec<u64> = (0..count).map(|_| rng.random()).collect();
        let results = engine.from_vec(source.clone()).unwrap();
        let out = engine.execute(&results, Ok).unwrap().collect_vec().unwrap();

        assert_eq!(source, out);
    }
}

#[test]
fn empty_source() {
    let engine = new_engine(2, &[("partitions", "4")]);
    let results = engine.from_vec(Vec::<String>::new()).unwrap();
    assert_eq!(0, results.elements_count().unwrap());

    let mut out = engine.execute(&results, Ok).unwrap();
    assert!(out.next().is_none());
    assert!(out.next().is_none());
}

#[test]
fn indexed_access() {
    let engine = new_engine(2, &[]);
    let results = engine.from_vec(vec!["a", "b", "c"]).unwrap();

    assert!(results.is_indexible());
    assert_eq!(3, results.elements_count().unwrap());
    assert_eq!("c", results.get_element(2).unwrap());

    let err = results.get_element(3).unwrap_err();
    assert_eq!(ErrorKind::IndexOutOfRange, err.kind());
}

#[test]
fn stream_source_round_trip() {
    for chunk_size in ["1", "3", "64"] {
        let engine = new_engine(
            3,
            &[
                ("partitions", "4"),
                ("chunk_size", chunk_size),
                ("merge_buffer_size", "2"),
            ],
        );
        let results = engine.from_iter((0..1000).map(|v| v.to_string())).unwrap();
        assert!(!results.is_indexible());

        let out = engine
            .execute(&results, |s: String| Ok(s.len()))
            .unwrap()
            .collect_vec()
            .unwrap();
        let expected: Vec<_> = (0..1000).map(|v: i32| v.to_string().len()).collect();
        assert_eq!(expected, out, "chunk size: {chunk_size}");

        // Stream can only be given once.
        let err = engine.execute(&results, Ok).unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }
}

/// Produces elements in descending order, striped across partitions, merged
/// with a reversed comparer.
#[derive(Debug)]
struct DescendingResults {
    count: i64,
    partitions: usize,
}

impl QueryResults<i64> for DescendingResults {
    fn give_partitioned_stream<R>(&self, recipient: R) -> Result<R::Output>
    where
        R: PartitionedStreamRecipient<i64>,
    {
        let partitions = (0..self.partitions)
            .map(|idx| {
                let step = self.partitions as i64;
                let start = self.count - 1 - idx as i64;
                let producer = (0..)
                    .map(move |n| start - n * step)
                    .take_while(|v| *v >= 0)
                    .map(|v| (v, v));
                Partition::new(idx, Box::new(producer))
            })
            .collect();

        let stream = PartitionedStream::new(partitions, Arc::new(ReverseOrder(NaturalOrder)));
        Ok(recipient.receive::<i64>(stream))
    }
}

#[test]
fn custom_key_comparer() {
    let engine = new_engine(2, &[("merge_buffer_size", "3")]);
    let results = DescendingResults {
        count: 50,
        partitions: 4,
    };
    assert!(!results.is_indexible());
    assert_eq!(
        ErrorKind::InvalidOperation,
        results.elements_count().unwrap_err().kind()
    );

    let out = engine.execute(&results, Ok).unwrap().collect_vec().unwrap();
    assert_eq!((0..50).rev().collect::<Vec<_>>(), out);
}

#[test]
fn default_partitions_from_threads() {
    let engine = new_engine(3, &[]);
    assert_eq!(3, engine.config().partitions);
    assert_eq!("3", engine.config().get_as_string("partitions").unwrap());
}
