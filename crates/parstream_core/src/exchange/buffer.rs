//! Bounded buffers between a partition's worker and the query's consumer.
//!
//! Every partition gets its own buffer with a single producer (the worker)
//! and a single consumer. Workers never touch another partition's buffer.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::worker::PartitionOutput;

/// Wakeup shared by all buffers of a query, used by a consumer that waits on
/// any partition instead of a specific one.
///
/// Producers only take the lock when the consumer announced it's waiting.
#[derive(Debug, Default)]
pub(crate) struct ConsumerSignal {
    waiting: AtomicBool,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl ConsumerSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Announce that the consumer is about to wait.
    ///
    /// The consumer must check its buffers again while holding the returned
    /// guard, then either wait with it or call `done_waiting`.
    pub(crate) fn prepare_wait(&self) -> MutexGuard<'_, ()> {
        let guard = self.lock.lock();
        self.waiting.store(true, Ordering::SeqCst);
        guard
    }

    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.wakeup.wait(guard);
    }

    pub(crate) fn done_waiting(&self) {
        self.waiting.store(false, Ordering::SeqCst);
    }

    fn notify(&self) {
        if self.waiting.load(Ordering::SeqCst) {
            let _guard = self.lock.lock();
            self.wakeup.notify_one();
        }
    }
}

/// Result of a non-blocking pop.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TryPop<T> {
    Item(T),
    Empty,
    /// Producer finished and everything was consumed.
    Finished,
}

#[derive(Debug)]
struct BufferState<U, K> {
    queue: VecDeque<(U, K)>,
    /// Waker for a producer waiting on room in the buffer.
    producer: Option<Waker>,
    finished: bool,
}

#[derive(Debug)]
pub(crate) struct PartitionBuffer<U, K> {
    state: Mutex<BufferState<U, K>>,
    available: Condvar,
    capacity: usize,
    signal: Option<Arc<ConsumerSignal>>,
}

impl<U, K> PartitionBuffer<U, K> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self::new_inner(capacity, None)
    }

    /// Create a buffer that also notifies `signal` on push and finish.
    pub(crate) fn with_signal(capacity: usize, signal: Arc<ConsumerSignal>) -> Self {
        Self::new_inner(capacity, Some(signal))
    }

    fn new_inner(capacity: usize, signal: Option<Arc<ConsumerSignal>>) -> Self {
        debug_assert!(capacity > 0);
        PartitionBuffer {
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                producer: None,
                finished: false,
            }),
            available: Condvar::new(),
            capacity,
            signal,
        }
    }

    /// Pop the next element, blocking until one is available.
    ///
    /// Returns None once the producer has finished and the buffer is drained.
    pub(crate) fn pop_blocking(&self) -> Option<(U, K)> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                Self::wake_producer(state);
                return Some(item);
            }

            if state.finished {
                return None;
            }

            self.available.wait(&mut state);
        }
    }

    pub(crate) fn try_pop(&self) -> TryPop<(U, K)> {
        let mut state = self.state.lock();
        match state.queue.pop_front() {
            Some(item) => {
                Self::wake_producer(state);
                TryPop::Item(item)
            }
            None if state.finished => TryPop::Finished,
            None => TryPop::Empty,
        }
    }

    /// Discard buffered elements and wake a waiting producer so that it can
    /// observe that the query stopped.
    pub(crate) fn abandon(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        Self::wake_producer(state);
    }

    fn wake_producer(mut state: MutexGuard<'_, BufferState<U, K>>) {
        let producer = state.producer.take();
        std::mem::drop(state);
        if let Some(waker) = producer {
            waker.wake();
        }
    }

    fn notify_consumer(&self) {
        self.available.notify_one();
        if let Some(signal) = &self.signal {
            signal.notify();
        }
    }
}

impl<U, K> PartitionOutput<U, K> for PartitionBuffer<U, K>
where
    U: Send,
    K: Send,
{
    fn poll_reserve(&self, cx: &mut Context) -> Poll<()> {
        let mut state = self.state.lock();
        if state.queue.len() < self.capacity {
            return Poll::Ready(());
        }
        state.producer = Some(cx.waker().clone());
        Poll::Pending
    }

    fn push(&self, item: U, key: K) {
        self.state.lock().queue.push_back((item, key));
        self.notify_consumer();
    }

    fn finish(&self) {
        self.state.lock().finished = true;
        self.notify_consumer();
    }
}

/// Wrapper for sharing a partition buffer as a worker's output.
pub(crate) struct BufferOutput<U, K>(pub(crate) Arc<PartitionBuffer<U, K>>);

impl<U, K> PartitionOutput<U, K> for BufferOutput<U, K>
where
    U: Send,
    K: Send,
{
    fn poll_reserve(&self, cx: &mut Context) -> Poll<()> {
        self.0.poll_reserve(cx)
    }

    fn push(&self, item: U, key: K) {
        self.0.push(item, key)
    }

    fn finish(&self) {
        self.0.finish()
    }
}

impl<U, K> fmt::Debug for BufferOutput<U, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferOutput")
            .field("capacity", &self.0.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn reserve_parks_when_full() {
        let buffer = PartitionBuffer::<i32, usize>::new(2);
        let mut cx = Context::from_waker(Waker::noop());

        assert!(buffer.poll_reserve(&mut cx).is_ready());
        buffer.push(1, 0);
        assert!(buffer.poll_reserve(&mut cx).is_ready());
        buffer.push(2, 1);
        assert!(buffer.poll_reserve(&mut cx).is_pending());

        assert_eq!(Some((1, 0)), buffer.pop_blocking());
        assert!(buffer.poll_reserve(&mut cx).is_ready());
    }

    #[test]
    fn try_pop_states() {
        let buffer = PartitionBuffer::<i32, usize>::new(4);
        assert_eq!(TryPop::Empty, buffer.try_pop());

        buffer.push(7, 0);
        buffer.finish();
        assert_eq!(TryPop::Item((7, 0)), buffer.try_pop());
        assert_eq!(TryPop::Finished, buffer.try_pop());
    }

    #[test]
    fn abandon_discards_and_unblocks_producer() {
        let buffer = PartitionBuffer::<i32, usize>::new(1);
        let mut cx = Context::from_waker(Waker::noop());

        buffer.push(1, 0);
        assert!(buffer.poll_reserve(&mut cx).is_pending());

        buffer.abandon();
        assert!(buffer.poll_reserve(&mut cx).is_ready());
        assert_eq!(TryPop::Empty, buffer.try_pop());
    }

    #[test]
    fn signal_wakes_waiting_consumer() {
        let signal = Arc::new(ConsumerSignal::new());
        let buffer = Arc::new(PartitionBuffer::<i32, usize>::with_signal(
            4,
            signal.clone(),
        ));

        let producer = buffer.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(3, 0);
        });

        let item = loop {
            let mut guard = signal.prepare_wait();
            let popped = buffer.try_pop();
            if popped == TryPop::Empty {
                signal.wait(&mut guard);
            }
            signal.done_waiting();
            if let TryPop::Item(item) = popped {
                break item;
            }
        };
        handle.join().unwrap();

        assert_eq!((3, 0), item);
    }
}
