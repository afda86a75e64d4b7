// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the caches.
//!
//! Callers treat every cache error as a miss; a broken cache degrades
//! performance, never correctness.

/// Errors raised by cache implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The cache directory could not be created or accessed.
    #[error("cache i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The storage backend rejected an operation.
    #[error("cache backend failure: {0}")]
    Backend(#[from] rusqlite::Error),
}
