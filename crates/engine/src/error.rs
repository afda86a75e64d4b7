// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the pipeline engine.
//!
//! A stage handler error is never fatal to the pipeline: the worker logs it,
//! acknowledges the item upstream and moves on. These types exist so that
//! handlers have one uniform way to say "this item failed".

/// A boxed error from a stage handler or one of its collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while processing one pipeline item.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The stage handler failed to process the item.
    #[error("item handler failed: {source}")]
    Handler {
        /// The underlying handler error.
        #[source]
        source: BoxError,
    },

    /// A stage cache rejected a read or write.
    #[error("cache failure: {0}")]
    Cache(#[from] safebench_cache::Error),

    /// A cached value could not be encoded or decoded.
    #[error("cached value codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    /// Wraps any error as a handler failure.
    pub fn handler<E: Into<BoxError>>(error: E) -> Self {
        Error::Handler {
            source: error.into(),
        }
    }

    /// Creates a handler failure from a plain message.
    pub fn message<S: Into<String>>(message: S) -> Self {
        Error::Handler {
            source: message.into().into(),
        }
    }
}
