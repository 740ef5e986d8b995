mod common;

use std::sync::{Arc, Barrier};

use common::new_engine;
use parstream_error::{DbError, ErrorKind};

#[test]
fn single_fault_surfaces_after_workers_finish() {
    for preserve_order in ["true", "false"] {
        let engine = new_engine(
            2,
            &[("partitions", "4"), ("preserve_order", preserve_order)],
        );
        let results = engine.from_vec((0..100).collect::<Vec<i32>>()).unwrap();

        let mut out = engine
            .execute(&results, |v| {
                if v == 60 {
                    Err(DbError::new("bad value").with_field("value", v))
                } else {
                    Ok(v)
                }
            })
            .unwrap();

        let err = out
            .by_ref()
            .find_map(|r| r.err())
            .expect("fault to surface");
        assert_eq!(ErrorKind::WorkerFault, err.kind());
        // 100 over 4 contiguous partitions, 60 is in partition 2.
        assert_eq!(Some("2"), err.get_field("partition"));
        assert_eq!("bad value", err.causes()[0].get_msg());
        assert_eq!(Some("60"), err.causes()[0].get_field("value"));

        // Fused after the error.
        assert!(out.next().is_none());
    }
}

#[test]
fn faults_from_three_partitions_aggregated() {
    for preserve_order in ["true", "false"] {
        let engine = new_engine(
            4,
            &[("partitions", "4"), ("preserve_order", preserve_order)],
        );
        let results = engine.from_vec((0..40).collect::<Vec<i32>>()).unwrap();

        // First element of partitions 0, 1, and 2 fail, but only after all
        // three started processing.
        let barrier = Arc::new(Barrier::new(3));
        let err = engine
            .execute(&results, move |v| {
                if v == 0 || v == 10 || v == 20 {
                    barrier.wait();
                    return Err(DbError::new(format!("failed on {v}")));
                }
                Ok(v)
            })
            .unwrap()
            .collect_vec()
            .unwrap_err();

        assert_eq!(ErrorKind::Aggregate, err.kind());
        let causes = err.causes();
        assert_eq!(3, causes.len());

        let partitions: Vec<_> = causes
            .iter()
            .map(|c| c.get_field("partition").unwrap())
            .collect();
        assert_eq!(vec!["0", "1", "2"], partitions);

        let msgs: Vec<_> = causes.iter().map(|c| c.causes()[0].get_msg()).collect();
        assert_eq!(vec!["failed on 0", "failed on 10", "failed on 20"], msgs);
    }
}

#[test]
fn panic_in_worker_is_fault() {
    let engine = new_engine(2, &[("partitions", "2")]);
    let results = engine.from_vec((0..10).collect::<Vec<i32>>()).unwrap();

    let err = engine
        .execute(&results, |v| {
            if v == 7 {
                panic!("cannot handle {v}");
            }
            Ok(v)
        })
        .unwrap()
        .collect_vec()
        .unwrap_err();

    assert_eq!(ErrorKind::WorkerFault, err.kind());
    assert_eq!(Some("1"), err.get_field("partition"));
    assert!(
        err.causes()[0].get_msg().contains("cannot handle 7"),
        "{err}"
    );
}

#[test]
fn invalid_configuration_rejected_before_execution() {
    let engine = new_engine(2, &[]);

    let mut conf = engine.config().clone();
    let err = conf.set_from_str("partitions", "0").unwrap_err();
    assert_eq!(ErrorKind::InvalidArgument, err.kind());

    let err = conf.set_from_str("partitions", "1000").unwrap_err();
    assert_eq!(ErrorKind::InvalidArgument, err.kind());

    let err = conf.set_from_str("chunk_size", "0").unwrap_err();
    assert_eq!(ErrorKind::InvalidArgument, err.kind());
    assert_eq!(engine.config(), &conf);
}
