mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use common::new_engine;

#[test]
fn same_multiset_as_source() {
    for striping in ["false", "true"] {
        for partitions in [1, 2, 3, 7, 16] {
            let engine = new_engine(
                4,
                &[
                    ("preserve_order", "false"),
                    ("use_striping", striping),
                    ("partitions", partitions.to_string().as_str()),
                ],
            );

            // Duplicates in the source must all come through.
            let source: Vec<i32> = (0..500).map(|v| v % 37).collect();
            let results = engine.from_vec(source.clone()).unwrap();
            let mut out = engine.execute(&results, Ok).unwrap().collect_vec().unwrap();

            let mut expected = source;
            expected.sort();
            out.sort();
            assert_eq!(expected, out, "partitions: {partitions}, striping: {striping}");
        }
    }
}

#[test]
fn stream_source_unordered() {
    let engine = new_engine(
        3,
        &[
            ("preserve_order", "false"),
            ("partitions", "5"),
            ("chunk_size", "7"),
        ],
    );
    let results = engine.from_iter(0..1234_u32).unwrap();
    let mut out = engine
        .execute(&results, |v| Ok(u64::from(v) * 2))
        .unwrap()
        .collect_vec()
        .unwrap();
    out.sort();

    assert_eq!((0..1234).map(|v| v * 2).collect::<Vec<u64>>(), out);
}

#[test]
fn empty_source_unordered() {
    let engine = new_engine(2, &[("preserve_order", "false")]);
    let results = engine.from_vec(Vec::<u8>::new()).unwrap();
    let out = engine.execute(&results, Ok).unwrap().collect_vec().unwrap();
    assert!(out.is_empty());
}

#[test]
fn processed_on_worker_threads() {
    let engine = new_engine(4, &[("preserve_order", "false"), ("partitions", "4")]);
    let results = engine.from_vec((0..200).collect::<Vec<i32>>()).unwrap();

    let threads: Arc<Mutex<HashSet<ThreadId>>> = Arc::default();
    let worker_threads = threads.clone();
    let out = engine
        .execute(&results, move |v| {
            worker_threads.lock().unwrap().insert(thread::current().id());
            Ok(v)
        })
        .unwrap()
        .collect_vec()
        .unwrap();
    assert_eq!(200, out.len());

    let threads = threads.lock().unwrap();
    assert!(!threads.contains(&thread::current().id()));
    assert!(!threads.is_empty());
}
