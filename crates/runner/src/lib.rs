// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The benchmark runner.
//!
//! Given benchmark definitions (hazards owning tests) and a set of SUTs,
//! [`BenchmarkRunner`] instantiates the required annotators (failing fast on
//! missing secrets), smoke-tests every external endpoint, pushes every
//! (item, SUT) pair through the five-stage pipeline with shared disk
//! caches, classifies each item as finished or failed, and hands the
//! finished items to the scoring traits — journaling the whole run as
//! JSON-lines along the way.
//!
//! Individual item failures are never fatal: they are recorded on the item,
//! counted in the failed bucket, and visible in the journal. The only
//! post-pipeline fatal is a hazard left with no records to score.

pub mod benchmark;
pub mod error;
pub mod items;
pub mod run;
pub mod runner;

mod pipeline;

pub use benchmark::{
    BenchmarkDefinition, BenchmarkScore, HazardDefinition, HazardScore, PromptResponseTest,
    TestError, TestRecord, TestResult,
};
pub use error::RunnerError;
pub use items::{ExceptionRecord, SutHandle, TestRunItem, TestWrapper, Timer};
pub use run::RunCore;
pub use runner::{BenchmarkRun, BenchmarkRunner, TestRun, TestRunner};
