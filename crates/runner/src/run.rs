// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared state of one benchmark run.
//!
//! A [`RunCore`] is created before the pipeline, shared (behind an `Arc`)
//! with every stage while it runs, and read out afterwards for scoring.
//! Result buckets and counters use interior mutability; everything else is
//! fixed at construction.

use crate::benchmark::PromptResponseTest;
use crate::error::RunnerError;
use crate::items::{SutHandle, TestRunItem, TestWrapper};
use chrono::Local;
use parking_lot::Mutex;
use safebench_cache::{Cache, DiskCache};
use safebench_model::{Annotator, InstanceFactory, RawSecrets};
use safebench_telemetry::journal::Caller;
use safebench_telemetry::{RunJournal, RunTracker};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Buckets of classified items keyed by (sut uid, test uid).
pub type ItemBuckets = BTreeMap<(String, String), Vec<TestRunItem>>;

/// Everything one run's stages share.
pub struct RunCore {
    /// The run's data directory.
    pub data_dir: PathBuf,
    /// Where tests download their dependencies.
    pub test_data_path: PathBuf,
    /// `run-YYYYMMDD-HHMMSS-µµµµµµ`.
    pub run_id: String,
    /// The run journal.
    pub journal: Arc<RunJournal>,
    /// The SUTs under test.
    pub suts: Vec<SutHandle>,
    /// The tests collected from every benchmark's hazards.
    pub tests: Vec<Arc<TestWrapper>>,
    /// Per-item cap; `None` runs everything.
    pub max_items: Option<usize>,
    /// Progress receiver.
    pub tracker: Arc<dyn RunTracker>,

    test_annotators: Mutex<BTreeMap<String, Vec<(String, Arc<dyn Annotator>)>>>,
    caches: Mutex<BTreeMap<String, (Arc<dyn Cache>, usize)>>,
    pub(crate) finished: Mutex<ItemBuckets>,
    pub(crate) failed: Mutex<ItemBuckets>,
    completed_count: AtomicU64,
}

impl RunCore {
    /// Creates the run state: directories, run id and journal.
    ///
    /// # Errors
    ///
    /// Returns an error when the directories or journal cannot be created.
    pub fn create(
        data_dir: &Path,
        suts: Vec<SutHandle>,
        max_items: Option<usize>,
        tracker: Arc<dyn RunTracker>,
    ) -> Result<Self, RunnerError> {
        std::fs::create_dir_all(data_dir)?;
        let test_data_path = data_dir.join("tests");
        std::fs::create_dir_all(&test_data_path)?;

        let run_id = Local::now().format("run-%Y%m%d-%H%M%S-%6f").to_string();
        let journal_path = data_dir
            .join("journals")
            .join(format!("journal-{run_id}.jsonl.zst"));
        let journal = Arc::new(RunJournal::new(&journal_path)?);

        Ok(RunCore {
            data_dir: data_dir.to_path_buf(),
            test_data_path,
            run_id,
            journal,
            suts,
            tests: Vec::new(),
            max_items,
            tracker,
            test_annotators: Mutex::new(BTreeMap::new()),
            caches: Mutex::new(BTreeMap::new()),
            finished: Mutex::new(BTreeMap::new()),
            failed: Mutex::new(BTreeMap::new()),
            completed_count: AtomicU64::new(0),
        })
    }

    /// Adds a test, instantiating its annotators after verifying every
    /// required secret is present.
    ///
    /// # Errors
    ///
    /// Returns an error when an annotator uid is unknown or any of its
    /// secrets are missing.
    pub fn add_test(
        &mut self,
        test: Arc<dyn PromptResponseTest>,
        annotator_factory: &InstanceFactory<dyn Annotator>,
        secrets: &RawSecrets,
    ) -> Result<(), RunnerError> {
        if self.tests.iter().any(|known| known.uid() == test.uid()) {
            return Ok(());
        }

        // Check every annotator's secrets before instantiating anything.
        let mut missing = Vec::new();
        for annotator_uid in test.annotators() {
            missing.extend(annotator_factory.missing_dependencies(&annotator_uid, secrets)?);
        }
        if !missing.is_empty() {
            return Err(safebench_model::ConfigError::MissingSecrets(missing).into());
        }

        let mut annotators = Vec::new();
        for annotator_uid in test.annotators() {
            let annotator = annotator_factory.make_instance(&annotator_uid, secrets)?;
            annotators.push((annotator_uid, annotator));
        }
        let _ = self
            .test_annotators
            .lock()
            .insert(test.uid().to_owned(), annotators);
        self.tests
            .push(Arc::new(TestWrapper::new(test, &self.test_data_path)));
        Ok(())
    }

    /// The annotator instances for one test.
    #[must_use]
    pub fn annotators_for(&self, test_uid: &str) -> Vec<(String, Arc<dyn Annotator>)> {
        self.test_annotators
            .lock()
            .get(test_uid)
            .cloned()
            .unwrap_or_default()
    }

    /// Every distinct annotator across every test.
    #[must_use]
    pub fn distinct_annotators(&self) -> BTreeMap<String, Arc<dyn Annotator>> {
        let mut distinct = BTreeMap::new();
        for annotators in self.test_annotators.lock().values() {
            for (uid, annotator) in annotators {
                let _ = distinct.entry(uid.clone()).or_insert_with(|| annotator.clone());
            }
        }
        distinct
    }

    /// Opens (or returns) the disk cache stored under `data_dir/name`,
    /// remembering its starting size for the end-of-run journal entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the cache cannot be opened.
    pub fn cache_for(&self, name: &str) -> Result<Arc<dyn Cache>, RunnerError> {
        let mut caches = self.caches.lock();
        if let Some((cache, _)) = caches.get(name) {
            return Ok(cache.clone());
        }
        let cache: Arc<dyn Cache> = Arc::new(DiskCache::open(&self.data_dir.join(name))?);
        let starting_size = cache.entry_count();
        let _ = caches.insert(name.to_owned(), (cache.clone(), starting_size));
        Ok(cache)
    }

    /// Classifies a fully processed item into the finished or failed bucket
    /// and journals the outcome.
    pub fn add_finished_item(&self, item: TestRunItem) {
        let sut_uid = item.sut_uid().unwrap_or_default().to_owned();
        let test_uid = item.test.uid().to_owned();
        let caller = Caller::new("RunCore", "add_finished_item");

        if item.finished() {
            self.journal_item("item finished", &item, Value::Null, caller);
            self.finished
                .lock()
                .entry((sut_uid, test_uid))
                .or_default()
                .push(item);
        } else {
            self.journal_item(
                "item failed",
                &item,
                serde_json::json!({
                    "completion": item.completion().is_some(),
                    "annotations": item.annotations.len(),
                    "fatal_exceptions": item.exceptions.len(),
                }),
                caller,
            );
            self.failed
                .lock()
                .entry((sut_uid, test_uid))
                .or_default()
                .push(item);
        }

        let completed = self.completed_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.tracker.update(completed);
    }

    /// Items completed (finished or failed) so far.
    #[must_use]
    pub fn completed_item_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }

    /// Finished-item counts keyed by (sut uid, test uid).
    #[must_use]
    pub fn finished_counts(&self) -> BTreeMap<(String, String), usize> {
        self.finished
            .lock()
            .iter()
            .map(|(key, items)| (key.clone(), items.len()))
            .collect()
    }

    /// Failed-item counts keyed by (sut uid, test uid).
    #[must_use]
    pub fn failed_counts(&self) -> BTreeMap<(String, String), usize> {
        self.failed
            .lock()
            .iter()
            .map(|(key, items)| (key.clone(), items.len()))
            .collect()
    }

    /// Writes one journal entry about `item`, merging its identity fields
    /// with `extra`.
    pub fn journal_item(&self, message: &str, item: &TestRunItem, extra: Value, caller: Caller) {
        let mut fields = item.journal_fields();
        if let Value::Object(extra) = extra {
            for (key, value) in extra {
                let _ = fields.insert(key, value);
            }
        }
        self.journal.raw_entry(message, caller, Value::Object(fields));
    }

    /// Journals one `cache info` entry per cache opened during the run.
    pub fn journal_cache_info(&self) {
        let caller = Caller::new("RunCore", "journal_cache_info");
        for (name, (cache, starting_size)) in self.caches.lock().iter() {
            let stats = cache.stats();
            self.journal.raw_entry(
                "cache info",
                caller,
                serde_json::json!({
                    "type": name,
                    "cache": cache.name(),
                    "start_count": starting_size,
                    "end_count": cache.entry_count(),
                    "gets": stats.gets,
                    "hits": stats.hits,
                    "puts": stats.puts,
                }),
            );
        }
    }
}
