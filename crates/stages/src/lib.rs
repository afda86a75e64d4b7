// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Concrete pipeline stages for prompts and annotations.
//!
//! The prompt side fans each [`TestItem`] out to every configured SUT and
//! calls the SUTs on a pool of worker threads, caching raw results and
//! retrying flaky remote calls. The annotation side does the same per
//! annotator, optionally adds an ensemble vote, and writes a JSONL row once
//! an interaction has every expected annotation.
//!
//! [`PipelineRunner`] assembles these stages into the five supported run
//! shapes (SUTs only, annotators only, both, each optionally with an
//! ensemble), runs the pipeline with progress tracking, and writes a
//! `metadata.json` summary next to the output file.
//!
//! [`TestItem`]: safebench_model::TestItem

pub mod annotation;
pub mod counts;
pub mod ensemble;
pub mod error;
pub mod prompt;
pub mod runner;

pub use annotation::{AnnotatorAssigner, AnnotatorSink, AnnotatorSource, AnnotatorWorkers};
pub use counts::UidCounts;
pub use ensemble::{ENSEMBLE_UID, EnsembleSpec, EnsembleStrategy, EnsembleVoter};
pub use error::Error;
pub use prompt::{PromptSink, PromptSource, PromptSutAssigner, PromptSutWorkers};
pub use runner::{PipelineRunner, RunMetadata};
