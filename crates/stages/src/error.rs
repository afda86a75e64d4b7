// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for pipeline assembly.
//!
//! Everything here is fatal and pre-pipeline; per-item trouble is handled
//! inside the stages and never surfaces as one of these.

use safebench_model::ConfigError;
use safebench_model::ready::ReadyCheckError;

/// Errors raised while assembling or finishing a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The run configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A pre-flight readiness probe failed.
    #[error(transparent)]
    Ready(#[from] ReadyCheckError),

    /// The configured ensemble cannot run.
    #[error("ensemble is not runnable: {0}")]
    Ensemble(String),

    /// An input or output dataset failed.
    #[error("dataset failure: {0}")]
    Data(#[from] safebench_data::Error),

    /// A cache directory could not be opened.
    #[error("cache failure: {0}")]
    Cache(#[from] safebench_cache::Error),

    /// Run metadata could not be encoded.
    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    /// The filesystem failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
