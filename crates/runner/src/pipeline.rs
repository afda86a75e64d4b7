// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The five benchmark pipeline stages.
//!
//! ```text
//! TestRunItemSource → TestRunSutAssigner → TestRunSutWorker(N)
//!                   → TestRunAnnotationWorker(N) → TestRunResultsCollector
//! ```
//!
//! Unlike the standalone prompt pipeline, the SUT worker here records a
//! failure on the item instead of retrying forever, and one annotation
//! worker runs all of a test's annotators for an item in sequence — an
//! annotator failure costs that one annotation, the rest still run.

use crate::items::{ExceptionRecord, TestRunItem, Timer};
use crate::run::RunCore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use safebench_cache::Cache;
use safebench_engine::{BoxError, Emitter, Error, Pipe, Sink, Source};
use safebench_model::{
    Annotation, Annotator, AnnotatorRequest, RawResponse, SutResponse, TestItem, canonical_json,
};
use safebench_telemetry::journal::Caller;
use serde_json::json;
use std::sync::Arc;

/// The fixed seed for `max_items` subsetting, so re-runs pick the same
/// items.
const SUBSET_SEED: u64 = 0;

pub(crate) fn limit_to_max(mut items: Vec<TestItem>, max_items: Option<usize>) -> Vec<TestItem> {
    if let Some(max_items) = max_items {
        if max_items < items.len() {
            let mut rng = StdRng::seed_from_u64(SUBSET_SEED);
            items.shuffle(&mut rng);
            items.truncate(max_items);
        }
    }
    items
}

/// Yields every test's (possibly capped) items as unassigned
/// [`TestRunItem`]s.
pub(crate) struct TestRunItemSource {
    run: Arc<RunCore>,
    queue_capacity: usize,
}

impl TestRunItemSource {
    pub(crate) fn new(run: Arc<RunCore>, queue_capacity: usize) -> Self {
        TestRunItemSource {
            run,
            queue_capacity,
        }
    }
}

impl Source for TestRunItemSource {
    type Output = TestRunItem;

    fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn new_item_iterable(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<TestRunItem, BoxError>> + '_> {
        let mut out: Vec<Result<TestRunItem, BoxError>> = Vec::new();
        for test in &self.run.tests {
            match test.make_test_items() {
                Ok(all_items) => {
                    let total = all_items.len();
                    let items = limit_to_max(all_items, self.run.max_items);
                    self.run.journal.raw_entry(
                        "using test items",
                        Caller::new("TestRunItemSource", "new_item_iterable"),
                        json!({"test": test.uid(), "using": items.len(), "total": total}),
                    );
                    out.extend(
                        items
                            .into_iter()
                            .map(|item| Ok(TestRunItem::new(test.clone(), item))),
                    );
                }
                Err(error) => {
                    out.push(Err(error.into()));
                    break;
                }
            }
        }
        Box::new(out.into_iter())
    }
}

/// Fans every item out to every SUT in the run.
pub(crate) struct TestRunSutAssigner {
    run: Arc<RunCore>,
}

impl TestRunSutAssigner {
    pub(crate) fn new(run: Arc<RunCore>) -> Self {
        TestRunSutAssigner { run }
    }
}

impl Pipe for TestRunSutAssigner {
    type Input = TestRunItem;
    type Output = TestRunItem;

    fn handle_item(
        &self,
        item: TestRunItem,
        out: &Emitter<'_, TestRunItem>,
    ) -> Result<(), Error> {
        for sut in &self.run.suts {
            let assigned = item.assigned_to(sut.clone());
            self.run.journal_item(
                "queuing item",
                &assigned,
                json!({"prompt_text": assigned.item.prompt.text}),
                Caller::new("TestRunSutAssigner", "handle_item"),
            );
            out.put(assigned);
        }
        Ok(())
    }
}

/// Calls the assigned SUT, consulting the shared response cache. Failures
/// are recorded on the item; the item always continues downstream.
pub(crate) struct TestRunSutWorker {
    run: Arc<RunCore>,
    cache: Arc<dyn Cache>,
    thread_count: usize,
}

impl TestRunSutWorker {
    pub(crate) fn new(run: Arc<RunCore>, cache: Arc<dyn Cache>, thread_count: usize) -> Self {
        TestRunSutWorker {
            run,
            cache,
            thread_count,
        }
    }

    fn process(&self, item: &mut TestRunItem) -> Result<(), ExceptionRecord> {
        let caller = Caller::new("TestRunSutWorker", "handle_item");
        let sut = item
            .sut
            .clone()
            .ok_or_else(|| ExceptionRecord::new("ConfigError", "item has no sut assigned"))?;
        let options = item.test.sut_options();
        let request = sut
            .sut
            .translate_text_prompt(&item.item.prompt, &options)
            .map_err(|error| ExceptionRecord::new("SutError", error.to_string()))?;
        let cache_key = canonical_json(&json!({
            "request": request.0,
            "sut": sut.uid,
        }));

        let raw = match self.lookup(&cache_key) {
            Some(raw) => {
                self.run
                    .journal_item("using cached sut response", item, json!({"response": raw.0}), caller);
                raw
            }
            None => {
                let timer = Timer::start();
                let raw = sut
                    .sut
                    .evaluate(&request)
                    .map_err(|error| ExceptionRecord::new("SutError", error.to_string()))?;
                let _ = item
                    .timings
                    .insert("fetch_sut_response".to_owned(), timer.elapsed_seconds());
                self.store(&cache_key, &raw);
                self.run.journal_item(
                    "fetched sut response",
                    item,
                    json!({
                        "run_time": timer.elapsed_seconds(),
                        "request": request.0,
                        "response": raw.0,
                    }),
                    caller,
                );
                raw
            }
        };

        let response = sut
            .sut
            .translate_response(&request, &raw)
            .map_err(|error| ExceptionRecord::new("SutError", error.to_string()))?;
        self.run.journal_item(
            "translated sut response",
            item,
            json!({"response": response.text}),
            caller,
        );
        item.sut_response = Some(response);
        Ok(())
    }

    fn lookup(&self, cache_key: &str) -> Option<RawResponse> {
        match self.cache.get(cache_key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(raw) => Some(raw),
                Err(error) => {
                    tracing::warn!(%error, "undecodable cached sut response; treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, "sut cache read failed; treating as miss");
                None
            }
        }
    }

    fn store(&self, cache_key: &str, raw: &RawResponse) {
        match serde_json::to_vec(raw) {
            Ok(bytes) => {
                if let Err(error) = self.cache.set(cache_key, &bytes) {
                    tracing::warn!(%error, "sut cache write failed");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to encode sut response for cache");
            }
        }
    }
}

impl Pipe for TestRunSutWorker {
    type Input = TestRunItem;
    type Output = TestRunItem;

    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn handle_item(
        &self,
        mut item: TestRunItem,
        out: &Emitter<'_, TestRunItem>,
    ) -> Result<(), Error> {
        if let Err(record) = self.process(&mut item) {
            tracing::error!(
                item = %item.source_id(),
                error = %record.message,
                "failure handling sut item"
            );
            self.run.journal_item(
                "sut exception",
                &item,
                json!({"exception": record.to_json()}),
                Caller::new("TestRunSutWorker", "handle_item"),
            );
            item.exceptions.push(record);
        }
        out.put(item);
        Ok(())
    }
}

/// Runs every required annotator for an item, then measures its quality.
pub(crate) struct TestRunAnnotationWorker {
    run: Arc<RunCore>,
    cache: Arc<dyn Cache>,
    thread_count: usize,
}

impl TestRunAnnotationWorker {
    pub(crate) fn new(run: Arc<RunCore>, cache: Arc<dyn Cache>, thread_count: usize) -> Self {
        TestRunAnnotationWorker {
            run,
            cache,
            thread_count,
        }
    }

    fn collect_annotations(&self, item: &mut TestRunItem) {
        let caller = Caller::new("TestRunAnnotationWorker", "collect_annotations");
        let Some(response) = item.sut_response.clone() else {
            return;
        };
        for (annotator_uid, annotator) in self.run.annotators_for(item.test.uid()) {
            match self.annotate_one(item, &response, &annotator_uid, annotator.as_ref()) {
                Ok(annotation) => {
                    self.run.journal_item(
                        "translated annotation",
                        item,
                        json!({"annotator": annotator_uid, "annotation": annotation.0}),
                        caller,
                    );
                    let _ = item.annotations.insert(annotator_uid, annotation);
                }
                Err(record) => {
                    tracing::error!(
                        annotator = %annotator_uid,
                        item = %item.source_id(),
                        error = %record.message,
                        "failure handling annotation"
                    );
                    self.run.journal_item(
                        "annotator exception",
                        item,
                        json!({"annotator": annotator_uid, "exception": record.to_json()}),
                        caller,
                    );
                    item.exceptions.push(record);
                }
            }
        }
    }

    fn annotate_one(
        &self,
        item: &TestRunItem,
        response: &SutResponse,
        annotator_uid: &str,
        annotator: &dyn Annotator,
    ) -> Result<Annotation, ExceptionRecord> {
        let caller = Caller::new("TestRunAnnotationWorker", "annotate_one");
        let request = annotator
            .translate_request(&item.item, response)
            .map_err(|error| ExceptionRecord::new("AnnotatorError", error.to_string()))?;
        let cache_key = cache_key_for(annotator_uid, &request);

        let raw = match self.lookup(&cache_key) {
            Some(raw) => {
                self.run.journal_item(
                    "using cached annotator response",
                    item,
                    json!({"annotator": annotator_uid, "response": raw.0}),
                    caller,
                );
                raw
            }
            None => {
                let timer = Timer::start();
                let raw = annotator
                    .annotate(&request)
                    .map_err(|error| ExceptionRecord::new("AnnotatorError", error.to_string()))?;
                self.store(&cache_key, &raw);
                self.run.journal_item(
                    "fetched annotator response",
                    item,
                    json!({
                        "annotator": annotator_uid,
                        "run_time": timer.elapsed_seconds(),
                        "response": raw.0,
                    }),
                    caller,
                );
                raw
            }
        };

        annotator
            .translate_response(&request, &raw)
            .map_err(|error| ExceptionRecord::new("AnnotatorError", error.to_string()))
    }

    fn measure(&self, item: &mut TestRunItem) -> Result<(), ExceptionRecord> {
        let measurements = item
            .test
            .measure_quality(item)
            .map_err(|error| ExceptionRecord::new("TestError", error.to_string()))?;
        item.measurements = measurements;
        Ok(())
    }

    fn lookup(&self, cache_key: &str) -> Option<RawResponse> {
        match self.cache.get(cache_key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(raw) => Some(raw),
                Err(error) => {
                    tracing::warn!(%error, "undecodable cached annotator response; treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, "annotator cache read failed; treating as miss");
                None
            }
        }
    }

    fn store(&self, cache_key: &str, raw: &RawResponse) {
        match serde_json::to_vec(raw) {
            Ok(bytes) => {
                if let Err(error) = self.cache.set(cache_key, &bytes) {
                    tracing::warn!(%error, "annotator cache write failed");
                }
            }
            Err(error) => {
                tracing::warn!(%error, "failed to encode annotator response for cache");
            }
        }
    }
}

fn cache_key_for(annotator_uid: &str, request: &AnnotatorRequest) -> String {
    canonical_json(&json!({
        "annotator": annotator_uid,
        "request": request.0,
    }))
}

impl Pipe for TestRunAnnotationWorker {
    type Input = TestRunItem;
    type Output = TestRunItem;

    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn handle_item(
        &self,
        mut item: TestRunItem,
        out: &Emitter<'_, TestRunItem>,
    ) -> Result<(), Error> {
        if item.completion().is_some() {
            let timer = Timer::start();
            self.collect_annotations(&mut item);
            match self.measure(&mut item) {
                Ok(()) => {
                    let _ = item
                        .timings
                        .insert("annotation".to_owned(), timer.elapsed_seconds());
                    self.run.journal_item(
                        "measured item quality",
                        &item,
                        json!({
                            "measurements": item.measurements,
                            "run_time": timer.elapsed_seconds(),
                        }),
                        Caller::new("TestRunAnnotationWorker", "handle_item"),
                    );
                }
                Err(record) => {
                    tracing::error!(
                        item = %item.source_id(),
                        error = %record.message,
                        "failure measuring item"
                    );
                    self.run.journal_item(
                        "annotation exception",
                        &item,
                        json!({"exception": record.to_json()}),
                        Caller::new("TestRunAnnotationWorker", "handle_item"),
                    );
                    item.exceptions.push(record);
                }
            }
        }
        out.put(item);
        Ok(())
    }
}

/// Classifies every fully processed item into the run's result buckets.
pub(crate) struct TestRunResultsCollector {
    run: Arc<RunCore>,
}

impl TestRunResultsCollector {
    pub(crate) fn new(run: Arc<RunCore>) -> Self {
        TestRunResultsCollector { run }
    }
}

impl Sink for TestRunResultsCollector {
    type Input = TestRunItem;

    fn handle_item(&mut self, item: TestRunItem) -> Result<(), Error> {
        self.run.add_finished_item(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safebench_model::TextPrompt;

    fn items(count: usize) -> Vec<TestItem> {
        (0..count)
            .map(|i| TestItem::new(format!("p{i}"), TextPrompt::new(format!("prompt {i}"))))
            .collect()
    }

    #[test]
    fn test_no_cap_keeps_everything_in_order() {
        let capped = limit_to_max(items(5), None);
        assert_eq!(capped.len(), 5);
        assert_eq!(capped[0].source_id.as_deref(), Some("p0"));
    }

    #[test]
    fn test_cap_larger_than_input_changes_nothing() {
        let capped = limit_to_max(items(3), Some(10));
        assert_eq!(capped.len(), 3);
        assert_eq!(capped[2].source_id.as_deref(), Some("p2"));
    }

    #[test]
    fn test_cap_selects_a_reproducible_subset() {
        let first = limit_to_max(items(100), Some(7));
        let second = limit_to_max(items(100), Some(7));
        assert_eq!(first.len(), 7);
        let first_ids: Vec<_> = first.iter().map(|item| item.source_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|item| item.source_id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }
}
