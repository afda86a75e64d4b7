// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The benchmark collaborator contracts.
//!
//! A benchmark aggregates hazards; a hazard owns tests; a test owns items
//! and a measurement function. The runner drives these traits but never
//! looks inside a score — grade bands, reference standards and the scoring
//! arithmetic all live with the implementations.

use crate::items::TestRunItem;
use chrono::{DateTime, Utc};
use safebench_model::{ModelOptions, TestItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Errors raised by benchmark, hazard and test implementations.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct TestError(pub String);

impl TestError {
    /// Creates an error.
    pub fn new<S: Into<String>>(message: S) -> Self {
        TestError(message.into())
    }
}

/// The opaque result a test computes over its finished items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestResult(pub Value);

/// One test's outcome for one SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Which test.
    pub test_uid: String,
    /// Which SUT.
    pub sut_uid: String,
    /// How many items finished cleanly.
    pub items_finished: usize,
    /// The aggregated result.
    pub result: TestResult,
}

/// One hazard's score for one SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardScore {
    /// Which hazard.
    pub hazard_uid: String,
    /// The score estimate.
    pub score: f64,
    /// How many samples the estimate rests on.
    pub samples: usize,
    /// The numeric grade band.
    pub numeric_grade: i64,
    /// The human-readable grade.
    pub text_grade: String,
}

/// One benchmark's score for one SUT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkScore {
    /// Which benchmark.
    pub benchmark_uid: String,
    /// Which SUT.
    pub sut_uid: String,
    /// The per-hazard scores the benchmark aggregates.
    pub hazard_scores: Vec<HazardScore>,
    /// When scoring completed.
    pub end_time: DateTime<Utc>,
}

/// A test: items plus a measurement function.
pub trait PromptResponseTest: Send + Sync {
    /// Unique identifier for this test.
    fn uid(&self) -> &str;

    /// The annotator uids every item of this test must be labeled by.
    fn annotators(&self) -> Vec<String>;

    /// The generation options this test wants its prompts run with.
    fn sut_options(&self) -> ModelOptions {
        ModelOptions::default()
    }

    /// Produces the test's items. `data_dir` is the test-owned download
    /// directory under the run's data dir.
    ///
    /// # Errors
    ///
    /// Returns an error when the test's data cannot be produced.
    fn make_test_items(&self, data_dir: &Path) -> Result<Vec<TestItem>, TestError>;

    /// Computes per-item quality measurements from its annotations.
    ///
    /// # Errors
    ///
    /// Returns an error when the item cannot be measured.
    fn measure_quality(&self, item: &TestRunItem) -> Result<BTreeMap<String, f64>, TestError>;

    /// Aggregates finished items into the test's result. Called even when
    /// `items` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error when aggregation fails.
    fn aggregate_measurements(&self, items: &[TestRunItem]) -> Result<TestResult, TestError>;
}

/// A named category of harm, owning one or more tests.
pub trait HazardDefinition: Send + Sync {
    /// Unique identifier for this hazard.
    fn uid(&self) -> &str;

    /// The tests this hazard is measured by.
    fn tests(&self) -> Vec<Arc<dyn PromptResponseTest>>;

    /// The previously-computed reference score used for grading, if any.
    fn reference_standard(&self) -> Option<f64> {
        None
    }

    /// Scores the hazard from its tests' records, keyed by test uid.
    ///
    /// # Errors
    ///
    /// Returns an error when the records cannot be scored.
    fn score(&self, records: &BTreeMap<String, TestRecord>) -> Result<HazardScore, TestError>;
}

/// A benchmark: a named set of hazards.
pub trait BenchmarkDefinition: Send + Sync {
    /// Unique identifier for this benchmark.
    fn uid(&self) -> &str;

    /// The hazards this benchmark aggregates.
    fn hazards(&self) -> Vec<Arc<dyn HazardDefinition>>;
}
