// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! File formats the engine reads and writes.
//!
//! Inputs are header-addressed CSV with case-insensitive, multi-spelling
//! column binding (see [`schema`]); outputs are the prompt-response CSV and
//! the annotations JSONL. Readers validate their header when opened, so a
//! malformed input fails the run before any worker thread starts.

pub mod dataset;
pub mod error;
pub mod schema;

pub use dataset::{
    AnnotationWriter, PromptDataset, PromptResponseDataset, PromptResponseWriter,
};
pub use error::Error;
pub use schema::{PromptResponseSchema, PromptSchema};
