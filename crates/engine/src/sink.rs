// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The tail stage of a pipeline.

use crate::error::Error;

/// A stage that only consumes.
///
/// The engine runs a single thread for a sink and scopes the stage between
/// [`open`](Sink::open) and [`close`](Sink::close), so an output writer
/// acquired in `open` is always released even when the run goes badly. If
/// `open` fails, the sink still drains its queue (so the pipeline can finish)
/// and each item's handler decides what to do without a writer.
pub trait Sink: Send + 'static {
    /// The item type consumed from upstream.
    type Input: Send + 'static;

    /// Stage name used for worker threads and logs.
    fn name(&self) -> String {
        crate::short_type_name::<Self>().to_owned()
    }

    /// Acquires the output writer. Called on the sink thread before the
    /// first item.
    ///
    /// # Errors
    ///
    /// Returns an error if the output could not be opened.
    fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Consumes one item.
    ///
    /// # Errors
    ///
    /// An error drops the item: it is logged and acknowledged upstream.
    fn handle_item(&mut self, item: Self::Input) -> Result<(), Error>;

    /// Releases the output writer. Called on the sink thread after the last
    /// item.
    ///
    /// # Errors
    ///
    /// Returns an error if the output could not be flushed or closed.
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}
