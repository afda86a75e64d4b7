// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The mutable scratchpad that accompanies one (item, SUT) pair through the
//! benchmark pipeline.

use crate::benchmark::{PromptResponseTest, TestError, TestResult};
use safebench_model::{Annotation, ModelOptions, Sut, SutResponse, TestItem};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// A journal-friendly record of one failure on one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    /// The failure's class, e.g. `"SutError"`.
    pub class: String,
    /// The failure's message.
    pub message: String,
}

impl ExceptionRecord {
    /// Creates a record.
    pub fn new<S1: Into<String>, S2: Into<String>>(class: S1, message: S2) -> Self {
        ExceptionRecord {
            class: class.into(),
            message: message.into(),
        }
    }

    /// The record as journal fields.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({"class": self.class, "message": self.message})
    }
}

/// A SUT together with its uid, as the runner carries it around.
#[derive(Clone)]
pub struct SutHandle {
    /// The SUT's uid.
    pub uid: String,
    /// The SUT itself.
    pub sut: Arc<dyn Sut>,
}

impl SutHandle {
    /// Creates a handle.
    pub fn new<S: Into<String>>(uid: S, sut: Arc<dyn Sut>) -> Self {
        SutHandle {
            uid: uid.into(),
            sut,
        }
    }
}

/// A test bound to the run's test-data directory.
pub struct TestWrapper {
    test: Arc<dyn PromptResponseTest>,
    data_dir: PathBuf,
}

impl TestWrapper {
    /// Wraps `test`, rooting its data under `data_dir`.
    pub fn new(test: Arc<dyn PromptResponseTest>, data_dir: &Path) -> Self {
        TestWrapper {
            test,
            data_dir: data_dir.to_path_buf(),
        }
    }

    /// The test's uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.test.uid()
    }

    /// The annotator uids this test requires.
    #[must_use]
    pub fn annotators(&self) -> Vec<String> {
        self.test.annotators()
    }

    /// The generation options this test runs with.
    #[must_use]
    pub fn sut_options(&self) -> ModelOptions {
        self.test.sut_options()
    }

    /// Produces the test's items.
    ///
    /// # Errors
    ///
    /// Returns an error when the test's data cannot be produced.
    pub fn make_test_items(&self) -> Result<Vec<TestItem>, TestError> {
        self.test.make_test_items(&self.data_dir)
    }

    /// Computes per-item measurements.
    ///
    /// # Errors
    ///
    /// Returns an error when the item cannot be measured.
    pub fn measure_quality(&self, item: &TestRunItem) -> Result<BTreeMap<String, f64>, TestError> {
        self.test.measure_quality(item)
    }

    /// Aggregates finished items into the test's result.
    ///
    /// # Errors
    ///
    /// Returns an error when aggregation fails.
    pub fn aggregate_measurements(&self, items: &[TestRunItem]) -> Result<TestResult, TestError> {
        self.test.aggregate_measurements(items)
    }
}

/// One (test item, SUT) pair working its way down the pipeline.
///
/// Created without a SUT by the source, fanned out per SUT by the assigner,
/// enriched by the SUT and annotation workers, and finally classified by the
/// sink: *finished* means a response arrived, every required annotator
/// produced a value and nothing went wrong; anything else is *failed*.
#[derive(Clone)]
pub struct TestRunItem {
    /// The owning test.
    pub test: Arc<TestWrapper>,
    /// The immutable item under test.
    pub item: TestItem,
    /// The SUT this copy is bound for, set by the assigner.
    pub sut: Option<SutHandle>,
    /// The SUT's response, set by the SUT worker.
    pub sut_response: Option<SutResponse>,
    /// Annotations keyed by annotator uid, set by the annotation worker.
    pub annotations: BTreeMap<String, Annotation>,
    /// Per-item quality measurements.
    pub measurements: BTreeMap<String, f64>,
    /// Everything that went wrong with this item.
    pub exceptions: Vec<ExceptionRecord>,
    /// Wall-clock seconds per expensive step.
    pub timings: BTreeMap<String, f64>,
}

impl TestRunItem {
    /// Creates an unassigned item.
    pub fn new(test: Arc<TestWrapper>, item: TestItem) -> Self {
        TestRunItem {
            test,
            item,
            sut: None,
            sut_response: None,
            annotations: BTreeMap::new(),
            measurements: BTreeMap::new(),
            exceptions: Vec::new(),
            timings: BTreeMap::new(),
        }
    }

    /// A fresh copy of this item bound to `sut`.
    #[must_use]
    pub fn assigned_to(&self, sut: SutHandle) -> Self {
        let mut item = TestRunItem::new(self.test.clone(), self.item.clone());
        item.sut = Some(sut);
        item
    }

    /// The item's identity in the underlying datasource.
    #[must_use]
    pub fn source_id(&self) -> String {
        self.item
            .source_id
            .clone()
            .unwrap_or_else(|| self.item.prompt.text.clone())
    }

    /// The assigned SUT's uid, if any.
    #[must_use]
    pub fn sut_uid(&self) -> Option<&str> {
        self.sut.as_ref().map(|handle| handle.uid.as_str())
    }

    /// The SUT's response, if one arrived.
    #[must_use]
    pub fn completion(&self) -> Option<&SutResponse> {
        self.sut_response.as_ref()
    }

    /// Whether this item ended in the finished bucket: response present,
    /// every required annotator present, no exceptions.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.sut_response.is_some()
            && self.exceptions.is_empty()
            && self
                .test
                .annotators()
                .iter()
                .all(|uid| self.annotations.contains_key(uid))
    }

    /// The item's identity as journal fields.
    #[must_use]
    pub fn journal_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let _ = fields.insert(
            "test".to_owned(),
            Value::String(self.test.uid().to_owned()),
        );
        let _ = fields.insert("item".to_owned(), Value::String(self.source_id()));
        if let Some(sut_uid) = self.sut_uid() {
            let _ = fields.insert("sut".to_owned(), Value::String(sut_uid.to_owned()));
        }
        fields
    }
}

/// Measures wall-clock time for journal `run_time` fields.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Starts the clock.
    #[must_use]
    pub fn start() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    /// Seconds elapsed since start.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
