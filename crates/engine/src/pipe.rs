// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Middle stages of a pipeline.

use crate::error::Error;
use safebench_channel::WorkQueue;

/// Hands a pipe's results to the next stage.
///
/// [`put`](Emitter::put) blocks while the downstream queue is full, which is
/// how backpressure propagates upstream. A handler may call it any number of
/// times, so one input can fan out into many outputs.
pub struct Emitter<'a, T> {
    queue: &'a WorkQueue<T>,
}

impl<'a, T> Emitter<'a, T> {
    pub(crate) fn new(queue: &'a WorkQueue<T>) -> Self {
        Emitter { queue }
    }

    /// Sends one item downstream, blocking while the queue is full.
    pub fn put(&self, item: T) {
        self.queue.put(item);
    }
}

/// A stage that both consumes and produces.
///
/// The engine runs [`thread_count`](Pipe::thread_count) symmetric workers.
/// Each worker pulls an item from the upstream queue, calls
/// [`handle_item`](Pipe::handle_item), and acknowledges the item whether the
/// handler succeeded or not. Handler errors are logged and the item dropped;
/// they never stop the pipeline.
pub trait Pipe: Send + Sync + 'static {
    /// The item type consumed from upstream.
    type Input: Send + 'static;
    /// The item type produced downstream.
    type Output: Send + 'static;

    /// Stage name used for worker threads and logs.
    fn name(&self) -> String {
        crate::short_type_name::<Self>().to_owned()
    }

    /// Number of worker threads for this stage.
    fn thread_count(&self) -> usize {
        1
    }

    /// Capacity of this stage's output queue; zero means unbounded.
    fn queue_capacity(&self) -> usize {
        0
    }

    /// Processes one item, emitting any number of results downstream.
    ///
    /// # Errors
    ///
    /// An error drops the item: the worker logs it, acknowledges upstream and
    /// continues with the next item.
    fn handle_item(&self, item: Self::Input, out: &Emitter<'_, Self::Output>) -> Result<(), Error>;

    /// Called once on the main thread after all workers have exited.
    fn on_close(&self) {}
}
