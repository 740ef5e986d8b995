mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::new_engine;
use parstream_core::exchange::state::CancellationSignal;
use parstream_error::{ErrorKind, Result};

/// Split output into the leading elements and the final error, if any.
fn split_output<U>(out: impl Iterator<Item = Result<U>>) -> (Vec<U>, Option<ErrorKind>) {
    let mut elems = Vec::new();
    for result in out {
        match result {
            Ok(v) => elems.push(v),
            Err(e) => return (elems, Some(e.kind())),
        }
    }
    (elems, None)
}

#[test]
fn cancel_before_kth_pull() {
    const K: usize = 17;

    for preserve_order in ["true", "false"] {
        let engine = new_engine(
            2,
            &[("partitions", "1"), ("preserve_order", preserve_order)],
        );
        let results = engine.from_vec((0..1000).collect::<Vec<usize>>()).unwrap();

        let cancel = CancellationSignal::new();
        let worker_cancel = cancel.clone();
        let out = engine
            .execute_with_cancel(&results, cancel, move |v| {
                if v == K - 1 {
                    worker_cancel.cancel();
                }
                Ok(v)
            })
            .unwrap();

        let (elems, err) = split_output(out);

        // The worker observes cancellation before pulling element K.
        assert!(elems.len() <= K, "got {} elements", elems.len());
        assert_eq!((0..elems.len()).collect::<Vec<_>>(), elems);
        assert_eq!(Some(ErrorKind::Cancelled), err);
    }
}

#[test]
fn cancel_through_output_handle() {
    let engine = new_engine(2, &[("partitions", "3"), ("merge_buffer_size", "1")]);
    let results = engine.from_vec((0..100_000).collect::<Vec<u32>>()).unwrap();

    let mut out = engine.execute(&results, Ok).unwrap();
    for expected in 0..5 {
        assert_eq!(expected, out.next().unwrap().unwrap());
    }

    out.cancel();

    let err = out.next().unwrap().unwrap_err();
    assert_eq!(ErrorKind::Cancelled, err.kind());
    assert!(out.next().is_none());
}

#[test]
fn canceled_before_start() {
    let engine = new_engine(2, &[("partitions", "4")]);
    let results = engine.from_iter(0..100).unwrap();

    let cancel = CancellationSignal::new();
    cancel.cancel();

    let out = engine.execute_with_cancel(&results, cancel, Ok).unwrap();
    let (elems, err) = split_output(out);
    assert!(elems.is_empty());
    assert_eq!(Some(ErrorKind::Cancelled), err);
}

/// Wait until the processed count stops changing.
fn wait_quiesced(processed: &AtomicUsize) -> usize {
    let mut last = processed.load(Ordering::SeqCst);
    loop {
        thread::sleep(Duration::from_millis(100));
        let curr = processed.load(Ordering::SeqCst);
        if curr == last {
            return curr;
        }
        last = curr;
    }
}

#[test]
fn dropped_output_stops_workers() {
    const N: usize = 5_000_000;

    for preserve_order in ["true", "false"] {
        let engine = new_engine(
            2,
            &[("partitions", "4"), ("preserve_order", preserve_order)],
        );
        let results = engine.from_iter(0..N).unwrap();

        let processed = Arc::new(AtomicUsize::new(0));
        let worker_processed = processed.clone();
        let mut out = engine
            .execute(&results, move |v| {
                worker_processed.fetch_add(1, Ordering::SeqCst);
                Ok(v)
            })
            .unwrap();

        for _ in 0..3 {
            out.next().unwrap().unwrap();
        }
        std::mem::drop(out);

        let count = wait_quiesced(&processed);
        assert!(count < N, "processed {count} elements after drop");
    }
}
