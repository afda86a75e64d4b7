// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO work queue connecting pipeline stages.
//!
//! Each stage of the pipeline owns the producer side of its downstream queue
//! and the consumer side of its upstream queue. Producers block when a bounded
//! queue is full (backpressure), consumers poll with a timeout so that the
//! engine's done-detection can run between attempts, and the queue keeps an
//! *unfinished tasks* count so a producer can [`join`](WorkQueue::join) until
//! every item it enqueued has been acknowledged with
//! [`task_done`](WorkQueue::task_done).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub mod error;

pub use error::RecvError;

struct QueueState<T> {
    items: VecDeque<T>,
    /// Items put but not yet acknowledged via `task_done`.
    unfinished: usize,
}

/// A FIFO queue with blocking `put`, timed `get` and task-completion
/// accounting.
///
/// A capacity of zero means unbounded. All operations are safe to call from
/// any number of threads.
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
    all_done: Condvar,
}

impl<T> WorkQueue<T> {
    /// Creates a new queue holding at most `capacity` items, or unbounded
    /// when `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        WorkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                unfinished: 0,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    /// Enqueues an item, blocking while the queue is full.
    pub fn put(&self, item: T) {
        let mut state = self.state.lock();
        while self.capacity != 0 && state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        state.unfinished += 1;
        self.not_empty.notify_one();
    }

    /// Dequeues an item, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`RecvError::Empty`] if no item arrived before the timeout.
    pub fn get(&self, timeout: Duration) -> Result<T, RecvError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                return match state.items.pop_front() {
                    Some(item) => {
                        self.not_full.notify_one();
                        Ok(item)
                    }
                    None => Err(RecvError::Empty),
                };
            }
        }
    }

    /// Acknowledges one previously dequeued item.
    ///
    /// Once the number of acknowledgements matches the number of items ever
    /// put, [`join`](WorkQueue::join) unblocks.
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        state.unfinished = state.unfinished.saturating_sub(1);
        if state.unfinished == 0 {
            self.all_done.notify_all();
        }
    }

    /// Blocks until every item ever put has been acknowledged.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.all_done.wait(&mut state);
        }
    }

    /// Number of items currently queued (not counting items handed out but
    /// not yet acknowledged).
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn test_put_then_get_in_order() {
        let queue = WorkQueue::new(0);
        queue.put(1);
        queue.put(2);
        assert_eq!(queue.get(SHORT).unwrap(), 1);
        assert_eq!(queue.get(SHORT).unwrap(), 2);
    }

    #[test]
    fn test_get_times_out_when_empty() {
        let queue: WorkQueue<i32> = WorkQueue::new(0);
        assert_eq!(queue.get(SHORT), Err(RecvError::Empty));
    }

    #[test]
    fn test_bounded_put_blocks_until_get() {
        let queue = Arc::new(WorkQueue::new(1));
        queue.put(1);

        let blocked = Arc::new(AtomicBool::new(true));
        let producer = {
            let queue = queue.clone();
            let blocked = blocked.clone();
            thread::spawn(move || {
                queue.put(2);
                blocked.store(false, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(blocked.load(Ordering::SeqCst), "put should block when full");

        assert_eq!(queue.get(SHORT).unwrap(), 1);
        producer.join().unwrap();
        assert_eq!(queue.get(SHORT).unwrap(), 2);
    }

    #[test]
    fn test_join_waits_for_task_done() {
        let queue = Arc::new(WorkQueue::new(0));
        queue.put("a");
        queue.put("b");

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for _ in 0..2 {
                    let _item = queue.get(Duration::from_secs(1)).unwrap();
                    thread::sleep(Duration::from_millis(20));
                    queue.task_done();
                }
            })
        };

        queue.join();
        assert!(queue.is_empty());
        consumer.join().unwrap();
    }

    #[test]
    fn test_join_returns_immediately_when_idle() {
        let queue: WorkQueue<()> = WorkQueue::new(4);
        queue.join();
    }

    #[test]
    fn test_concurrent_producers_and_consumers() {
        let queue = Arc::new(WorkQueue::new(4));
        let mut handles = Vec::new();
        for base in 0..4 {
            let queue = queue.clone();
            handles.push(thread::spawn(move || {
                for i in 0..25 {
                    queue.put(base * 25 + i);
                }
            }));
        }

        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Ok(item) = queue.get(Duration::from_millis(100)) {
                seen.push(item);
                queue.task_done();
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }
}
