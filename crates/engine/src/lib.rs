// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! A small framework for staged, multi-threaded pipelines.
//!
//! A [`Pipeline`] is an ordered chain of stages, each running its own worker
//! threads: a [`Source`] at the head produces items, any number of [`Pipe`]s
//! transform them in the middle, and a [`Sink`] at the tail consumes them.
//! Stages are connected by bounded [`WorkQueue`]s, so a slow downstream stage
//! naturally stalls its upstream producers.
//!
//! Building a pipeline looks like this:
//!
//! ```ignore
//! let mut pipeline = Pipeline::builder(MySource::new())
//!     .pipe(MyPipe::new())
//!     .sink(MySink::new());
//! pipeline.run();
//! ```
//!
//! Multiple worker threads per pipe mostly help when the handler waits on the
//! network, which is exactly what the SUT and annotator worker stages do.
//!
//! Termination is detected without any end-of-stream token: a stage is *done*
//! once its own work is finished, its output queue is drained, and its
//! upstream stage is done — evaluated recursively up to the source.
//!
//! [`WorkQueue`]: safebench_channel::WorkQueue

use std::time::Duration;

pub mod caching;
pub mod error;
pub mod pipe;
pub mod pipeline;
pub mod sink;
pub mod source;

mod stage;

pub use caching::{CachedWorker, CachingPipe};
pub use error::{BoxError, Error};
pub use pipe::{Emitter, Pipe};
pub use pipeline::{Pipeline, PipelineBuilder, Progress};
pub use sink::Sink;
pub use source::Source;

/// How long a worker waits on its upstream queue before re-checking whether
/// the upstream stage is done.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The unqualified name of a type, used as the default stage name.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Creates an [`Emitter`] over a bare queue, so stage handlers can be
/// exercised in tests without assembling a pipeline.
#[must_use]
pub fn testing_emitter<T>(queue: &safebench_channel::WorkQueue<T>) -> Emitter<'_, T> {
    Emitter::new(queue)
}
