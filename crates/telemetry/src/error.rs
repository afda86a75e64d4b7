// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the telemetry crate.

/// Errors raised while opening or closing telemetry outputs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The journal file could not be created, written or finished.
    #[error("journal i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
