// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the work queue.

/// Errors that can occur when consuming items from a [`WorkQueue`].
///
/// [`WorkQueue`]: crate::WorkQueue
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// No item became available before the timeout expired.
    #[error("The queue is empty")]
    Empty,
}
