// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The benchmark and test runners.
//!
//! A runner collects SUTs and benchmarks (or bare tests), verifies secrets
//! and endpoint readiness, assembles the five-stage pipeline over shared
//! disk caches, runs it to completion, and hands the finished items to the
//! scoring traits. Every step of the way lands in the run journal.

use crate::benchmark::{BenchmarkDefinition, BenchmarkScore, PromptResponseTest, TestRecord};
use crate::error::RunnerError;
use crate::items::{SutHandle, Timer};
use crate::pipeline::{
    TestRunAnnotationWorker, TestRunItemSource, TestRunResultsCollector, TestRunSutAssigner,
    TestRunSutWorker,
};
use crate::run::RunCore;
use chrono::Utc;
use safebench_engine::Pipeline;
use safebench_model::{
    Annotator, ConfigError, InstanceFactory, ModelOptions, RawSecrets, Sut,
    check_annotators_ready, check_suts_ready,
};
use safebench_telemetry::journal::Caller;
use safebench_telemetry::{NullRunTracker, RunTracker};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The outcome of a [`TestRunner`] run.
#[derive(Debug)]
pub struct TestRun {
    /// The run's identifier.
    pub run_id: String,
    /// Per-(test uid, sut uid) records.
    pub test_records: BTreeMap<(String, String), TestRecord>,
    /// Finished-item counts keyed by (sut uid, test uid).
    pub finished_counts: BTreeMap<(String, String), usize>,
    /// Failed-item counts keyed by (sut uid, test uid).
    pub failed_counts: BTreeMap<(String, String), usize>,
}

/// The outcome of a [`BenchmarkRunner`] run.
#[derive(Debug)]
pub struct BenchmarkRun {
    /// The run's identifier.
    pub run_id: String,
    /// Per-(test uid, sut uid) records.
    pub test_records: BTreeMap<(String, String), TestRecord>,
    /// Per-(benchmark uid, sut uid) scores.
    pub benchmark_scores: BTreeMap<(String, String), BenchmarkScore>,
    /// Finished-item counts keyed by (sut uid, test uid).
    pub finished_counts: BTreeMap<(String, String), usize>,
    /// Failed-item counts keyed by (sut uid, test uid).
    pub failed_counts: BTreeMap<(String, String), usize>,
}

fn ready_checks(core: &RunCore) -> Result<(), RunnerError> {
    let suts: BTreeMap<String, Arc<dyn Sut>> = core
        .suts
        .iter()
        .map(|handle| (handle.uid.clone(), handle.sut.clone()))
        .collect();
    check_suts_ready(&suts, &ModelOptions::default()).into_result("sut")?;

    let annotators = core.distinct_annotators();
    if !annotators.is_empty() {
        check_annotators_ready(&annotators).into_result("annotator")?;
    }
    Ok(())
}

fn expected_item_count(core: &RunCore) -> Result<usize, RunnerError> {
    let mut per_sut = 0;
    for test in &core.tests {
        let available = test.make_test_items()?.len();
        per_sut += match core.max_items {
            Some(max_items) => available.min(max_items),
            None => available,
        };
    }
    Ok(per_sut * core.suts.len())
}

fn run_pipeline(core: &Arc<RunCore>, thread_count: usize) -> Result<f64, RunnerError> {
    let sut_cache = core.cache_for("sut_cache")?;
    let annotator_cache = core.cache_for("annotator_cache")?;

    core.journal.raw_entry(
        "running pipeline",
        Caller::new("BenchmarkRunner", "run"),
        Value::Null,
    );
    let timer = Timer::start();
    let mut pipeline = Pipeline::builder(TestRunItemSource::new(core.clone(), thread_count * 4))
        .pipe(TestRunSutAssigner::new(core.clone()))
        .pipe(TestRunSutWorker::new(core.clone(), sut_cache, thread_count))
        .pipe(TestRunAnnotationWorker::new(
            core.clone(),
            annotator_cache,
            thread_count,
        ))
        .sink(TestRunResultsCollector::new(core.clone()));
    pipeline.run();
    let elapsed = timer.elapsed_seconds();

    let total_finished: usize = core.finished_counts().values().sum();
    core.journal.raw_entry(
        "finished pipeline",
        Caller::new("BenchmarkRunner", "run"),
        json!({
            "time": elapsed,
            "total_finished": total_finished,
            "finished_counts": counts_to_json(&core.finished_counts()),
        }),
    );
    Ok(elapsed)
}

fn counts_to_json(counts: &BTreeMap<(String, String), usize>) -> Value {
    let mut by_sut = serde_json::Map::new();
    for ((sut_uid, test_uid), count) in counts {
        let entry = by_sut
            .entry(sut_uid.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(tests) = entry {
            let _ = tests.insert(test_uid.clone(), json!(count));
        }
    }
    Value::Object(by_sut)
}

fn calculate_test_results(
    core: &RunCore,
) -> Result<BTreeMap<(String, String), TestRecord>, RunnerError> {
    let mut records = BTreeMap::new();
    for sut in &core.suts {
        for test in &core.tests {
            let finished = {
                let buckets = core.finished.lock();
                buckets
                    .get(&(sut.uid.clone(), test.uid().to_owned()))
                    .cloned()
                    .unwrap_or_default()
            };
            let result = test.aggregate_measurements(&finished)?;
            core.journal.raw_entry(
                "test scored",
                Caller::new("BenchmarkRunner", "calculate_test_results"),
                json!({
                    "sut": sut.uid,
                    "test": test.uid(),
                    "items_finished": finished.len(),
                    "result": result.0,
                }),
            );
            let record = TestRecord {
                test_uid: test.uid().to_owned(),
                sut_uid: sut.uid.clone(),
                items_finished: finished.len(),
                result,
            };
            let _ = records.insert((test.uid().to_owned(), sut.uid.clone()), record);
        }
    }
    Ok(records)
}

fn journal_run_start(
    core: &RunCore,
    tests: &[Arc<dyn PromptResponseTest>],
    thread_count: usize,
    extra_fields: Value,
) {
    let caller = Caller::new("BenchmarkRunner", "run");
    let mut fields = serde_json::Map::new();
    let _ = fields.insert("run_id".to_owned(), json!(core.run_id));
    let _ = fields.insert(
        "tests".to_owned(),
        json!(tests.iter().map(|test| test.uid().to_owned()).collect::<Vec<_>>()),
    );
    let _ = fields.insert(
        "suts".to_owned(),
        json!(core.suts.iter().map(|sut| sut.uid.clone()).collect::<Vec<_>>()),
    );
    let _ = fields.insert("max_items".to_owned(), json!(core.max_items));
    let _ = fields.insert("thread_count".to_owned(), json!(thread_count));
    if let Value::Object(extra) = extra_fields {
        for (key, value) in extra {
            let _ = fields.insert(key, value);
        }
    }
    core.journal
        .raw_entry("starting run", caller, Value::Object(fields));
    for test in tests {
        core.journal.raw_entry(
            "test info",
            caller,
            json!({
                "test": test.uid(),
                "sut_options": serde_json::to_value(test.sut_options()).unwrap_or(Value::Null),
                "annotators": test.annotators(),
            }),
        );
    }
}

/// Runs bare tests (no hazard or benchmark aggregation) against a set of
/// SUTs.
pub struct TestRunner {
    data_dir: PathBuf,
    annotator_factory: Arc<InstanceFactory<dyn Annotator>>,
    secrets: RawSecrets,
    suts: Vec<SutHandle>,
    tests: Vec<Arc<dyn PromptResponseTest>>,
    max_items: Option<usize>,
    thread_count: usize,
    tracker: Arc<dyn RunTracker>,
}

impl TestRunner {
    /// Creates a runner writing under `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path, annotator_factory: Arc<InstanceFactory<dyn Annotator>>) -> Self {
        TestRunner {
            data_dir: data_dir.to_path_buf(),
            annotator_factory,
            secrets: RawSecrets::new(),
            suts: Vec::new(),
            tests: Vec::new(),
            max_items: Some(10),
            thread_count: 1,
            tracker: Arc::new(NullRunTracker),
        }
    }

    /// Provides the secrets annotator constructors may need.
    pub fn set_secrets(&mut self, secrets: RawSecrets) {
        self.secrets = secrets;
    }

    /// Adds a SUT to run every test against.
    pub fn add_sut<S: Into<String>>(&mut self, uid: S, sut: Arc<dyn Sut>) {
        self.suts.push(SutHandle::new(uid, sut));
    }

    /// Adds a test.
    pub fn add_test(&mut self, test: Arc<dyn PromptResponseTest>) {
        self.tests.push(test);
    }

    /// Caps items per test; `None` runs everything.
    pub fn set_max_items(&mut self, max_items: Option<usize>) {
        self.max_items = max_items;
    }

    /// Sets worker threads per worker stage.
    pub fn set_thread_count(&mut self, thread_count: usize) {
        self.thread_count = thread_count;
    }

    /// Sets the progress receiver.
    pub fn set_tracker(&mut self, tracker: Arc<dyn RunTracker>) {
        self.tracker = tracker;
    }

    /// Runs the tests to completion.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, missing secrets, failed
    /// readiness probes, or a failing scoring implementation.
    pub fn run(&self) -> Result<TestRun, RunnerError> {
        if self.suts.is_empty() {
            return Err(ConfigError::Incomplete("must call add_sut() at least once").into());
        }
        if self.tests.is_empty() {
            return Err(ConfigError::Incomplete("must call add_test() at least once").into());
        }
        if self.max_items == Some(0) {
            return Err(ConfigError::InvalidOptions("max_items must be positive".to_owned()).into());
        }

        let mut core = RunCore::create(
            &self.data_dir,
            self.suts.clone(),
            self.max_items,
            self.tracker.clone(),
        )?;
        for test in &self.tests {
            core.add_test(test.clone(), &self.annotator_factory, &self.secrets)?;
        }
        ready_checks(&core)?;
        journal_run_start(&core, &self.tests, self.thread_count, Value::Null);

        let expected = expected_item_count(&core)?;
        core.tracker.start(expected as u64);

        let core = Arc::new(core);
        let _elapsed = run_pipeline(&core, self.thread_count)?;
        let test_records = calculate_test_results(&core)?;

        core.tracker.done();
        core.journal.raw_entry(
            "finished run",
            Caller::new("TestRunner", "run"),
            json!({"run_id": core.run_id}),
        );
        core.journal_cache_info();
        core.journal.close();

        Ok(TestRun {
            run_id: core.run_id.clone(),
            test_records,
            finished_counts: core.finished_counts(),
            failed_counts: core.failed_counts(),
        })
    }
}

/// Runs benchmarks — hazards of tests — against a set of SUTs and scores
/// them.
pub struct BenchmarkRunner {
    data_dir: PathBuf,
    annotator_factory: Arc<InstanceFactory<dyn Annotator>>,
    secrets: RawSecrets,
    suts: Vec<SutHandle>,
    benchmarks: Vec<Arc<dyn BenchmarkDefinition>>,
    max_items: Option<usize>,
    thread_count: usize,
    tracker: Arc<dyn RunTracker>,
}

impl BenchmarkRunner {
    /// Creates a runner writing under `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path, annotator_factory: Arc<InstanceFactory<dyn Annotator>>) -> Self {
        BenchmarkRunner {
            data_dir: data_dir.to_path_buf(),
            annotator_factory,
            secrets: RawSecrets::new(),
            suts: Vec::new(),
            benchmarks: Vec::new(),
            max_items: Some(10),
            thread_count: 1,
            tracker: Arc::new(NullRunTracker),
        }
    }

    /// Provides the secrets annotator constructors may need.
    pub fn set_secrets(&mut self, secrets: RawSecrets) {
        self.secrets = secrets;
    }

    /// Adds a SUT to run every benchmark against.
    pub fn add_sut<S: Into<String>>(&mut self, uid: S, sut: Arc<dyn Sut>) {
        self.suts.push(SutHandle::new(uid, sut));
    }

    /// Adds a benchmark.
    pub fn add_benchmark(&mut self, benchmark: Arc<dyn BenchmarkDefinition>) {
        self.benchmarks.push(benchmark);
    }

    /// Caps items per test; `None` runs everything.
    pub fn set_max_items(&mut self, max_items: Option<usize>) {
        self.max_items = max_items;
    }

    /// Sets worker threads per worker stage.
    pub fn set_thread_count(&mut self, thread_count: usize) {
        self.thread_count = thread_count;
    }

    /// Sets the progress receiver.
    pub fn set_tracker(&mut self, tracker: Arc<dyn RunTracker>) {
        self.tracker = tracker;
    }

    /// Runs the benchmarks to completion and scores them.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, missing secrets, failed
    /// readiness probes, failing scoring implementations, or a hazard left
    /// with no records — the only post-pipeline fatal.
    pub fn run(&self) -> Result<BenchmarkRun, RunnerError> {
        if self.suts.is_empty() {
            return Err(ConfigError::Incomplete("must call add_sut() at least once").into());
        }
        if self.benchmarks.is_empty() {
            return Err(ConfigError::Incomplete("must call add_benchmark() at least once").into());
        }
        if self.max_items == Some(0) {
            return Err(ConfigError::InvalidOptions("max_items must be positive".to_owned()).into());
        }

        let mut core = RunCore::create(
            &self.data_dir,
            self.suts.clone(),
            self.max_items,
            self.tracker.clone(),
        )?;
        let mut all_tests = Vec::new();
        for benchmark in &self.benchmarks {
            for hazard in benchmark.hazards() {
                for test in hazard.tests() {
                    core.add_test(test.clone(), &self.annotator_factory, &self.secrets)?;
                    all_tests.push(test);
                }
            }
        }
        ready_checks(&core)?;
        journal_run_start(
            &core,
            &all_tests,
            self.thread_count,
            json!({
                "benchmarks": self
                    .benchmarks
                    .iter()
                    .map(|benchmark| benchmark.uid().to_owned())
                    .collect::<Vec<_>>(),
            }),
        );

        let expected = expected_item_count(&core)?;
        core.tracker.start(expected as u64);

        let core = Arc::new(core);
        let _elapsed = run_pipeline(&core, self.thread_count)?;
        let test_records = calculate_test_results(&core)?;
        let benchmark_scores = self.calculate_benchmark_scores(&core, &test_records)?;

        core.tracker.done();
        core.journal.raw_entry(
            "finished run",
            Caller::new("BenchmarkRunner", "run"),
            json!({"run_id": core.run_id}),
        );
        core.journal_cache_info();
        core.journal.close();

        Ok(BenchmarkRun {
            run_id: core.run_id.clone(),
            test_records,
            benchmark_scores,
            finished_counts: core.finished_counts(),
            failed_counts: core.failed_counts(),
        })
    }

    fn calculate_benchmark_scores(
        &self,
        core: &RunCore,
        test_records: &BTreeMap<(String, String), TestRecord>,
    ) -> Result<BTreeMap<(String, String), BenchmarkScore>, RunnerError> {
        let caller = Caller::new("BenchmarkRunner", "calculate_benchmark_scores");
        let mut scores = BTreeMap::new();
        for benchmark in &self.benchmarks {
            for sut in &core.suts {
                let mut hazard_scores = Vec::new();
                for hazard in benchmark.hazards() {
                    let no_records = || RunnerError::NoRecords {
                        benchmark: benchmark.uid().to_owned(),
                        sut: sut.uid.clone(),
                        hazard: hazard.uid().to_owned(),
                    };
                    let mut hazard_records = BTreeMap::new();
                    for test in hazard.tests() {
                        let record = test_records
                            .get(&(test.uid().to_owned(), sut.uid.clone()))
                            .ok_or_else(no_records)?;
                        let _ = hazard_records.insert(test.uid().to_owned(), record.clone());
                    }
                    if hazard_records.is_empty() {
                        return Err(no_records());
                    }

                    let score = hazard.score(&hazard_records)?;
                    core.journal.raw_entry(
                        "hazard scored",
                        caller,
                        json!({
                            "benchmark": benchmark.uid(),
                            "sut": sut.uid,
                            "hazard": hazard.uid(),
                            "score": score.score,
                            "reference": hazard.reference_standard(),
                            "samples": score.samples,
                            "numeric_grade": score.numeric_grade,
                            "text_grade": score.text_grade,
                        }),
                    );
                    hazard_scores.push(score);
                }

                core.journal.raw_entry(
                    "benchmark scored",
                    caller,
                    json!({
                        "benchmark": benchmark.uid(),
                        "sut": sut.uid,
                        "hazards": hazard_scores.len(),
                    }),
                );
                let _ = scores.insert(
                    (benchmark.uid().to_owned(), sut.uid.clone()),
                    BenchmarkScore {
                        benchmark_uid: benchmark.uid().to_owned(),
                        sut_uid: sut.uid.clone(),
                        hazard_scores,
                        end_time: Utc::now(),
                    },
                );
            }
        }
        Ok(scores)
    }
}
