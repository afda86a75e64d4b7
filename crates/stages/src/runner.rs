// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Standalone pipeline runs: SUTs only, annotators only, or both, each
//! optionally with an ensemble.
//!
//! The runner owns everything around the pipeline itself: pre-flight
//! readiness probes, cache directories, run ids and output naming, progress
//! tracking, and the `metadata.json` summary written next to the output
//! file.

use crate::annotation::{AnnotatorAssigner, AnnotatorSink, AnnotatorSource, AnnotatorWorkers};
use crate::counts::UidCounts;
use crate::ensemble::{EnsembleSpec, EnsembleVoter};
use crate::error::Error;
use crate::prompt::{DEFAULT_RETRY_DELAY, DEFAULT_WORKERS, PromptSink, PromptSource, PromptSutAssigner, PromptSutWorkers};
use chrono::{DateTime, Local};
use safebench_cache::{Cache, DiskCache, NullCache};
use safebench_engine::{CachingPipe, Pipeline};
use safebench_model::{
    Annotation, Annotator, ConfigError, ModelOptions, SafetyAnnotation, Sut,
    check_annotators_ready, check_suts_ready,
};
use safebench_telemetry::RunTracker;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Where a finished run landed and what it recorded.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    /// The run's identifier (also the output directory name).
    pub run_id: String,
    /// Directory holding the run's outputs.
    pub output_dir: PathBuf,
    /// The main output file.
    pub output_file: PathBuf,
    /// The contents written to `metadata.json`.
    pub metadata: Value,
}

#[derive(Default)]
struct RunCounters {
    responses: Option<Arc<UidCounts>>,
    annotations: Option<Arc<UidCounts>>,
    votes: Option<Arc<AtomicU64>>,
}

/// Assembles and runs one standalone pipeline.
pub struct PipelineRunner {
    workers: usize,
    suts: BTreeMap<String, Arc<dyn Sut>>,
    annotators: BTreeMap<String, Arc<dyn Annotator>>,
    ensemble: Option<EnsembleSpec>,
    options: ModelOptions,
    input_path: PathBuf,
    root_dir: PathBuf,
    cache_dir: Option<PathBuf>,
    tag: Option<String>,
    sut_retry_delay: Duration,
    prompt_uid_col: Option<String>,
    prompt_text_col: Option<String>,
    sut_uid_col: Option<String>,
    sut_response_col: Option<String>,
}

impl PipelineRunner {
    /// Creates a runner reading `input_path` and writing under `root_dir`.
    #[must_use]
    pub fn new(input_path: &Path, root_dir: &Path) -> Self {
        PipelineRunner {
            workers: DEFAULT_WORKERS,
            suts: BTreeMap::new(),
            annotators: BTreeMap::new(),
            ensemble: None,
            options: ModelOptions::default(),
            input_path: input_path.to_path_buf(),
            root_dir: root_dir.to_path_buf(),
            cache_dir: None,
            tag: None,
            sut_retry_delay: DEFAULT_RETRY_DELAY,
            prompt_uid_col: None,
            prompt_text_col: None,
            sut_uid_col: None,
            sut_response_col: None,
        }
    }

    /// Sets the SUTs to run prompts through.
    #[must_use]
    pub fn with_suts(mut self, suts: BTreeMap<String, Arc<dyn Sut>>) -> Self {
        self.suts = suts;
        self
    }

    /// Sets the annotators to run interactions through.
    #[must_use]
    pub fn with_annotators(mut self, annotators: BTreeMap<String, Arc<dyn Annotator>>) -> Self {
        self.annotators = annotators;
        self
    }

    /// Adds an ensemble vote over a subset of the annotators.
    #[must_use]
    pub fn with_ensemble(mut self, ensemble: EnsembleSpec) -> Self {
        self.ensemble = Some(ensemble);
        self
    }

    /// Sets the worker thread count per worker stage.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the generation options passed to every SUT.
    #[must_use]
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables disk caching under `cache_dir`.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: &Path) -> Self {
        self.cache_dir = Some(cache_dir.to_path_buf());
        self
    }

    /// Adds a human-readable tag to the run id.
    #[must_use]
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Overrides the sleep between SUT retries (primarily for tests).
    #[must_use]
    pub fn with_sut_retry_delay(mut self, delay: Duration) -> Self {
        self.sut_retry_delay = delay;
        self
    }

    /// Overrides the accepted input column names.
    #[must_use]
    pub fn with_input_columns(
        mut self,
        prompt_uid: Option<&str>,
        prompt_text: Option<&str>,
        sut_uid: Option<&str>,
        sut_response: Option<&str>,
    ) -> Self {
        self.prompt_uid_col = prompt_uid.map(str::to_owned);
        self.prompt_text_col = prompt_text.map(str::to_owned);
        self.sut_uid_col = sut_uid.map(str::to_owned);
        self.sut_response_col = sut_response.map(str::to_owned);
        self
    }

    fn output_file_name(&self) -> &'static str {
        match (self.suts.is_empty(), self.annotators.is_empty()) {
            (false, true) => "prompt-responses.csv",
            (true, _) => "annotations.jsonl",
            (false, false) => "prompt-responses-annotated.jsonl",
        }
    }

    fn run_id(&self, started: &DateTime<Local>) -> String {
        let timestamp = started.format("%Y%m%d-%H%M%S").to_string();
        let mut parts = vec![match &self.tag {
            Some(tag) => format!("{timestamp}-{tag}"),
            None => timestamp,
        }];
        parts.extend(self.suts.keys().cloned());
        match &self.ensemble {
            Some(spec) => {
                // Member uids collapse into the "ensemble" shorthand.
                parts.extend(
                    self.annotators
                        .keys()
                        .filter(|uid| !spec.annotators.contains(*uid))
                        .cloned(),
                );
                parts.push(crate::ensemble::ENSEMBLE_UID.to_owned());
            }
            None => parts.extend(self.annotators.keys().cloned()),
        }
        parts.join("-")
    }

    fn validate(&self) -> Result<(), Error> {
        if self.suts.is_empty() && self.annotators.is_empty() {
            return Err(ConfigError::Incomplete(
                "must specify at least one SUT or annotator",
            )
            .into());
        }
        if !self.suts.is_empty() && (self.sut_uid_col.is_some() || self.sut_response_col.is_some())
        {
            return Err(ConfigError::Incomplete(
                "SUT uid and SUT response input columns are not used when running SUTs",
            )
            .into());
        }
        if let Some(spec) = &self.ensemble {
            if self.annotators.is_empty() {
                return Err(Error::Ensemble("an ensemble requires annotators".to_owned()));
            }
            let missing: Vec<String> = spec
                .annotators
                .iter()
                .filter(|uid| !self.annotators.contains_key(*uid))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(Error::Ensemble(format!(
                    "ensemble annotators {missing:?} not found in provided annotators"
                )));
            }
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), Error> {
        if !self.suts.is_empty() {
            check_suts_ready(&self.suts, &self.options).into_result("sut")?;
        }
        if !self.annotators.is_empty() {
            check_annotators_ready(&self.annotators).into_result("annotator")?;
        }
        if let Some(spec) = &self.ensemble {
            // Exercise the strategy once so a broken one dies pre-flight.
            let probe: BTreeMap<String, Annotation> = spec
                .annotators
                .iter()
                .map(|uid| (uid.clone(), Annotation::from(SafetyAnnotation::new(true))))
                .collect();
            let _ = spec
                .strategy
                .compute_response(&probe)
                .map_err(|error| Error::Ensemble(error.to_string()))?;
        }
        Ok(())
    }

    fn cache_for(&self, name: &str) -> Result<Arc<dyn Cache>, Error> {
        match &self.cache_dir {
            Some(dir) => Ok(Arc::new(DiskCache::open(&dir.join(name))?)),
            None => Ok(Arc::new(NullCache::new())),
        }
    }

    fn execute(pipeline: &mut Pipeline, tracker: &dyn RunTracker, total_items: usize) {
        tracker.start(total_items as u64);
        pipeline.run_with_progress(|progress| tracker.update(progress.completed));
        tracker.done();
    }

    /// Runs the configured pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, failed readiness probes,
    /// unreadable input, or unwritable output. Per-item failures never
    /// surface here.
    pub fn run(&self, tracker: &dyn RunTracker) -> Result<RunMetadata, Error> {
        self.validate()?;
        self.ensure_ready()?;

        let started = Local::now();
        let run_id = self.run_id(&started);
        let output_dir = self.root_dir.join(&run_id);
        std::fs::create_dir_all(&output_dir)?;
        let output_file = output_dir.join(self.output_file_name());

        let mut counters = RunCounters::default();
        let num_input_items;

        if self.suts.is_empty() {
            // Annotator-only run over an existing prompt-response file.
            let dataset = safebench_data::PromptResponseDataset::open_with_columns(
                &self.input_path,
                self.prompt_uid_col.as_deref(),
                self.prompt_text_col.as_deref(),
                self.sut_uid_col.as_deref(),
                self.sut_response_col.as_deref(),
            )?;
            num_input_items = dataset.item_count()?;
            let total = num_input_items * self.annotators.len();

            let workers = AnnotatorWorkers::new(self.annotators.clone(), Some(self.workers));
            counters.annotations = Some(workers.annotation_counts());
            let annotator_cache = self.cache_for("annotator_cache")?;
            let uids: Vec<String> = self.annotators.keys().cloned().collect();

            let builder = Pipeline::builder(AnnotatorSource::new(dataset))
                .pipe(AnnotatorAssigner::new(self.annotators.clone()))
                .pipe(CachingPipe::new(workers, annotator_cache));
            let mut pipeline = match &self.ensemble {
                Some(spec) => {
                    let voter = EnsembleVoter::new(spec.clone());
                    counters.votes = Some(voter.vote_count());
                    builder
                        .pipe(voter)
                        .sink(AnnotatorSink::new(&output_file, uids, true))
                }
                None => builder.sink(AnnotatorSink::new(&output_file, uids, false)),
            };
            Self::execute(&mut pipeline, tracker, total);
        } else {
            let dataset = safebench_data::PromptDataset::open_with_columns(
                &self.input_path,
                self.prompt_uid_col.as_deref(),
                self.prompt_text_col.as_deref(),
            )?;
            num_input_items = dataset.item_count()?;

            let sut_workers =
                PromptSutWorkers::new(self.suts.clone(), self.options.clone(), Some(self.workers))?
                    .with_retry_delay(self.sut_retry_delay);
            counters.responses = Some(sut_workers.response_counts());
            let sut_cache = self.cache_for("sut_cache")?;

            let builder = Pipeline::builder(PromptSource::new(dataset))
                .pipe(PromptSutAssigner::new(self.suts.clone()))
                .pipe(CachingPipe::new(sut_workers, sut_cache));

            if self.annotators.is_empty() {
                // SUT-only run: rows land in the CSV as soon as a SUT
                // responds.
                let total = num_input_items * self.suts.len();
                let mut pipeline = builder.sink(PromptSink::new(&output_file));
                Self::execute(&mut pipeline, tracker, total);
            } else {
                let total = num_input_items * self.suts.len() * self.annotators.len();
                let workers = AnnotatorWorkers::new(self.annotators.clone(), Some(self.workers));
                counters.annotations = Some(workers.annotation_counts());
                let annotator_cache = self.cache_for("annotator_cache")?;
                let uids: Vec<String> = self.annotators.keys().cloned().collect();

                let builder = builder
                    .pipe(AnnotatorAssigner::new(self.annotators.clone()))
                    .pipe(CachingPipe::new(workers, annotator_cache));
                let mut pipeline = match &self.ensemble {
                    Some(spec) => {
                        let voter = EnsembleVoter::new(spec.clone());
                        counters.votes = Some(voter.vote_count());
                        builder
                            .pipe(voter)
                            .sink(AnnotatorSink::new(&output_file, uids, true))
                    }
                    None => builder.sink(AnnotatorSink::new(&output_file, uids, false)),
                };
                Self::execute(&mut pipeline, tracker, total);
            }
        }

        let finished = Local::now();
        let metadata = self.metadata(&started, &finished, &run_id, num_input_items, &counters);
        std::fs::write(
            output_dir.join("metadata.json"),
            serde_json::to_vec_pretty(&metadata)?,
        )?;
        tracing::info!(output = %output_file.display(), "output saved");

        Ok(RunMetadata {
            run_id,
            output_dir,
            output_file,
            metadata,
        })
    }

    fn metadata(
        &self,
        started: &DateTime<Local>,
        finished: &DateTime<Local>,
        run_id: &str,
        num_input_items: usize,
        counters: &RunCounters,
    ) -> Value {
        let elapsed = (*finished - *started).num_seconds().max(0);
        let duration = format!(
            "{}h{:02}m{:02}s",
            elapsed / 3600,
            (elapsed % 3600) / 60,
            elapsed % 60
        );

        let mut metadata = json!({
            "run_id": run_id,
            "run_info": {
                "started": started.to_rfc3339(),
                "finished": finished.to_rfc3339(),
                "duration": duration,
            },
            "input": {
                "source": self.input_path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default(),
                "num_items": num_input_items,
            },
        });
        let root = metadata
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("metadata is an object"));

        if let Some(responses) = &counters.responses {
            let by_sut = responses.snapshot();
            let _ = root.insert(
                "suts".to_owned(),
                Value::Array(
                    self.suts
                        .keys()
                        .map(|uid| json!({"uid": uid}))
                        .collect(),
                ),
            );
            let _ = root.insert(
                "responses".to_owned(),
                json!({
                    "count": responses.total(),
                    "by_sut": by_sut.iter().map(|(uid, count)| (uid.clone(), json!({"count": count}))).collect::<serde_json::Map<_, _>>(),
                }),
            );
        }
        if let Some(annotations) = &counters.annotations {
            let by_annotator = annotations.snapshot();
            let _ = root.insert(
                "annotators".to_owned(),
                Value::Array(
                    self.annotators
                        .keys()
                        .map(|uid| json!({"uid": uid}))
                        .collect(),
                ),
            );
            let _ = root.insert(
                "annotations".to_owned(),
                json!({
                    "count": annotations.total(),
                    "by_annotator": by_annotator.iter().map(|(uid, count)| (uid.clone(), json!({"count": count}))).collect::<serde_json::Map<_, _>>(),
                }),
            );
        }
        if let (Some(votes), Some(spec)) = (&counters.votes, &self.ensemble) {
            let _ = root.insert(
                "ensemble".to_owned(),
                json!({
                    "annotators": spec.annotators.iter().cloned().collect::<Vec<_>>(),
                    "num_votes": votes.load(Ordering::Relaxed),
                }),
            );
        }
        metadata
    }
}
