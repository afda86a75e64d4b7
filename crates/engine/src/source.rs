// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The head stage of a pipeline.

use crate::error::BoxError;

/// A stage that only produces items.
///
/// The engine runs one thread for a source: it drains the iterator returned
/// by [`new_item_iterable`](Source::new_item_iterable), enqueues every `Ok`
/// item downstream, and marks the stage done when the iterator ends. An `Err`
/// item ends the source early and cleanly — the pipeline still runs to
/// completion with whatever was produced before the failure.
pub trait Source: Send + 'static {
    /// The item type this source produces.
    type Output: Send + 'static;

    /// Stage name used for worker threads and logs.
    fn name(&self) -> String {
        crate::short_type_name::<Self>().to_owned()
    }

    /// Capacity of this stage's output queue; zero means unbounded.
    fn queue_capacity(&self) -> usize {
        0
    }

    /// Returns the finite sequence of items to feed into the pipeline.
    fn new_item_iterable(&mut self) -> Box<dyn Iterator<Item = Result<Self::Output, BoxError>> + '_>;
}
