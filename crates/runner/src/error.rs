// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the benchmark runner.
//!
//! Per-item failures are recorded on the items and never surface here;
//! these errors are the fatal kind — bad configuration, failed pre-flight
//! checks, and the one post-pipeline fatal: a hazard with nothing to score.

use crate::benchmark::TestError;
use safebench_model::ConfigError;
use safebench_model::ready::ReadyCheckError;

/// Fatal errors raised by the benchmark runner.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    /// The run configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A pre-flight readiness probe failed.
    #[error(transparent)]
    Ready(#[from] ReadyCheckError),

    /// A benchmark, hazard or test implementation failed.
    #[error(transparent)]
    Test(#[from] TestError),

    /// A hazard had no test records to score.
    #[error("no records found for benchmark {benchmark}, sut {sut}, hazard {hazard}")]
    NoRecords {
        /// The benchmark being scored.
        benchmark: String,
        /// The SUT being scored.
        sut: String,
        /// The hazard with an empty record set.
        hazard: String,
    },

    /// A run cache could not be opened.
    #[error("cache failure: {0}")]
    Cache(#[from] safebench_cache::Error),

    /// The run journal could not be opened.
    #[error("journal failure: {0}")]
    Journal(#[from] safebench_telemetry::Error),

    /// The filesystem failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
