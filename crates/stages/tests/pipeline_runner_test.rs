// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests for the standalone pipeline runner.

use safebench_model::ready::PROBE_PROMPT;
use safebench_model::{
    AnnotatorError, AnnotatorRequest, Annotation, Annotator, Capability, ModelOptions,
    RawResponse, SafetyAnnotation, Sut, SutError, SutRequest, SutResponse, TestItem, TextPrompt,
};
use safebench_stages::{EnsembleSpec, EnsembleStrategy, Error, PipelineRunner};
use safebench_telemetry::NullRunTracker;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Echoes the prompt back. Optionally fails the first N item evaluations;
/// readiness probes are never failed and never counted.
struct EchoSut {
    uid: String,
    fail_first: u64,
    failures_injected: AtomicU64,
    item_evaluate_calls: Arc<AtomicU64>,
}

impl EchoSut {
    fn new(uid: &str) -> Self {
        Self::failing(uid, 0)
    }

    fn failing(uid: &str, fail_first: u64) -> Self {
        EchoSut {
            uid: uid.to_owned(),
            fail_first,
            failures_injected: AtomicU64::new(0),
            item_evaluate_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    fn call_counter(&self) -> Arc<AtomicU64> {
        self.item_evaluate_calls.clone()
    }
}

impl Sut for EchoSut {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::AcceptsTextPrompt]
    }

    fn translate_text_prompt(
        &self,
        prompt: &TextPrompt,
        options: &ModelOptions,
    ) -> Result<SutRequest, SutError> {
        Ok(SutRequest(json!({
            "model": self.uid,
            "prompt": prompt.text,
            "max_tokens": options.max_tokens,
        })))
    }

    fn evaluate(&self, request: &SutRequest) -> Result<RawResponse, SutError> {
        let prompt = request.0["prompt"].as_str().unwrap_or_default();
        if prompt == PROBE_PROMPT {
            return Ok(RawResponse(json!({"text": "probe ok"})));
        }
        let _ = self.item_evaluate_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_injected.load(Ordering::SeqCst) < self.fail_first {
            let _ = self.failures_injected.fetch_add(1, Ordering::SeqCst);
            return Err(SutError::transient("service unavailable"));
        }
        Ok(RawResponse(json!({"text": prompt})))
    }

    fn translate_response(
        &self,
        _request: &SutRequest,
        raw: &RawResponse,
    ) -> Result<SutResponse, SutError> {
        Ok(SutResponse::new(raw.0["text"].as_str().unwrap_or_default()))
    }
}

/// Always fails its probe.
struct DeadSut {
    uid: String,
}

impl Sut for DeadSut {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::AcceptsTextPrompt]
    }

    fn translate_text_prompt(
        &self,
        prompt: &TextPrompt,
        _options: &ModelOptions,
    ) -> Result<SutRequest, SutError> {
        Ok(SutRequest(json!({"prompt": prompt.text})))
    }

    fn evaluate(&self, _request: &SutRequest) -> Result<RawResponse, SutError> {
        Err(SutError::new("connection refused"))
    }

    fn translate_response(
        &self,
        _request: &SutRequest,
        _raw: &RawResponse,
    ) -> Result<SutResponse, SutError> {
        Err(SutError::new("unreachable"))
    }
}

/// Marks responses containing "bad" as unsafe.
#[derive(Debug)]
struct KeywordAnnotator {
    uid: String,
}

impl Annotator for KeywordAnnotator {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn translate_request(
        &self,
        _item: &TestItem,
        response: &SutResponse,
    ) -> Result<AnnotatorRequest, AnnotatorError> {
        Ok(AnnotatorRequest(json!({
            "annotator": self.uid,
            "text": response.text,
        })))
    }

    fn annotate(&self, request: &AnnotatorRequest) -> Result<RawResponse, AnnotatorError> {
        let text = request.0["text"].as_str().unwrap_or_default();
        Ok(RawResponse(json!({"is_safe": !text.contains("bad")})))
    }

    fn translate_response(
        &self,
        _request: &AnnotatorRequest,
        raw: &RawResponse,
    ) -> Result<Annotation, AnnotatorError> {
        Ok(SafetyAnnotation::new(raw.0["is_safe"].as_bool().unwrap_or(false)).into())
    }
}

/// Fails every annotation call, probes included are fine.
#[derive(Debug)]
struct BrokenAnnotator {
    uid: String,
}

impl Annotator for BrokenAnnotator {
    fn uid(&self) -> &str {
        &self.uid
    }

    fn translate_request(
        &self,
        _item: &TestItem,
        response: &SutResponse,
    ) -> Result<AnnotatorRequest, AnnotatorError> {
        Ok(AnnotatorRequest(json!({"text": response.text})))
    }

    fn annotate(&self, request: &AnnotatorRequest) -> Result<RawResponse, AnnotatorError> {
        let text = request.0["text"].as_str().unwrap_or_default();
        if text == "To get to the other side." {
            // Pass the readiness probe; fail everything real.
            return Ok(RawResponse(json!({"is_safe": true})));
        }
        Err(AnnotatorError::new("annotator exploded"))
    }

    fn translate_response(
        &self,
        _request: &AnnotatorRequest,
        raw: &RawResponse,
    ) -> Result<Annotation, AnnotatorError> {
        Ok(SafetyAnnotation::new(raw.0["is_safe"].as_bool().unwrap_or(false)).into())
    }
}

struct AllSafeStrategy;

impl EnsembleStrategy for AllSafeStrategy {
    fn compute_response(
        &self,
        annotations: &BTreeMap<String, Annotation>,
    ) -> Result<Annotation, AnnotatorError> {
        let safe = annotations
            .values()
            .filter_map(Annotation::as_safety)
            .all(|annotation| annotation.is_safe);
        Ok(SafetyAnnotation::new(safe).into())
    }
}

fn write_prompts(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("prompts.csv");
    std::fs::write(&path, "prompt_uid,prompt_text\n1,a\n2,b\n").unwrap();
    path
}

fn suts_of(suts: Vec<EchoSut>) -> BTreeMap<String, Arc<dyn Sut>> {
    suts.into_iter()
        .map(|sut| {
            let uid = sut.uid.clone();
            (uid, Arc::new(sut) as Arc<dyn Sut>)
        })
        .collect()
}

fn annotators_of(uids: &[&str]) -> BTreeMap<String, Arc<dyn Annotator>> {
    uids.iter()
        .map(|uid| {
            (
                (*uid).to_owned(),
                Arc::new(KeywordAnnotator {
                    uid: (*uid).to_owned(),
                }) as Arc<dyn Annotator>,
            )
        })
        .collect()
}

fn read_csv_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|record| {
            record
                .unwrap()
                .iter()
                .map(|field| field.to_owned())
                .collect()
        })
        .collect()
}

fn read_jsonl(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_prompt_by_sut_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());

    let runner = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts_of(vec![EchoSut::new("s1"), EchoSut::new("s2")]))
        .with_workers(2);
    let outcome = runner.run(&NullRunTracker).unwrap();

    let mut rows = read_csv_rows(&outcome.output_file);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["1", "a", "s1", "a"],
            vec!["1", "a", "s2", "a"],
            vec!["2", "b", "s1", "b"],
            vec!["2", "b", "s2", "b"],
        ]
        .into_iter()
        .map(|row| row.into_iter().map(str::to_owned).collect::<Vec<_>>())
        .collect::<Vec<_>>()
    );
    assert_eq!(outcome.metadata["responses"]["count"], 4);
}

#[test]
fn test_second_run_hits_the_cache_and_matches_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());
    let cache_dir = dir.path().join("cache");

    let first_sut = EchoSut::new("s1");
    let first_calls = first_sut.call_counter();
    let first = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts_of(vec![first_sut]))
        .with_workers(1)
        .with_cache_dir(&cache_dir)
        .with_tag("first")
        .run(&NullRunTracker)
        .unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 2);

    // Fresh SUT instance, same cache directory: everything is served from
    // disk.
    let second_sut = EchoSut::new("s1");
    let second_calls = second_sut.call_counter();
    let second = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts_of(vec![second_sut]))
        .with_workers(1)
        .with_cache_dir(&cache_dir)
        .with_tag("second")
        .run(&NullRunTracker)
        .unwrap();

    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    let first_bytes = std::fs::read(&first.output_file).unwrap();
    let second_bytes = std::fs::read(&second.output_file).unwrap();
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn test_sut_retry_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.csv");
    std::fs::write(&path, "prompt_uid,prompt_text\n1,ok\n").unwrap();

    let sut = EchoSut::failing("flaky", 3);
    let calls = sut.call_counter();
    let outcome = PipelineRunner::new(&path, &dir.path().join("runs"))
        .with_suts(suts_of(vec![sut]))
        .with_sut_retry_delay(Duration::from_millis(1))
        .run(&NullRunTracker)
        .unwrap();

    let rows = read_csv_rows(&outcome.output_file);
    assert_eq!(rows, vec![vec!["1", "ok", "flaky", "ok"]]);
    // Three failures plus the final success.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_partially_annotated_rows_are_withheld() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());

    let mut annotators = annotators_of(&["good"]);
    let _ = annotators.insert(
        "broken".to_owned(),
        Arc::new(BrokenAnnotator {
            uid: "broken".to_owned(),
        }) as Arc<dyn Annotator>,
    );

    let outcome = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts_of(vec![EchoSut::new("s1")]))
        .with_annotators(annotators)
        .run(&NullRunTracker)
        .unwrap();

    // Every interaction is missing the broken annotator's entry, so no row
    // may be written.
    assert!(read_jsonl(&outcome.output_file).is_empty());
}

#[test]
fn test_combined_run_with_ensemble_adds_a_vote_slot() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());

    let outcome = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts_of(vec![EchoSut::new("s1")]))
        .with_annotators(annotators_of(&["alpha", "beta"]))
        .with_ensemble(EnsembleSpec::new(
            ["alpha", "beta"],
            Arc::new(AllSafeStrategy),
        ))
        .run(&NullRunTracker)
        .unwrap();

    let rows = read_jsonl(&outcome.output_file);
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let annotations = row["Annotations"].as_object().unwrap();
        assert_eq!(annotations.len(), 3);
        assert!(annotations.contains_key("alpha"));
        assert!(annotations.contains_key("beta"));
        assert!(annotations.contains_key("ensemble"));
        assert_eq!(annotations["ensemble"]["is_safe"], true);
    }
    assert_eq!(outcome.metadata["ensemble"]["num_votes"], 2);
    assert!(outcome.run_id.contains("ensemble"));
    assert!(!outcome.run_id.contains("alpha"));
}

#[test]
fn test_annotator_only_run_reads_existing_responses() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("responses.csv");
    std::fs::write(
        &input,
        "prompt_uid,prompt_text,sut_uid,sut_response\n1,a,s1,bad stuff\n2,b,s1,fine\n",
    )
    .unwrap();

    let outcome = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_annotators(annotators_of(&["safety"]))
        .run(&NullRunTracker)
        .unwrap();

    let rows = read_jsonl(&outcome.output_file);
    assert_eq!(rows.len(), 2);
    let by_uid: BTreeMap<String, &serde_json::Value> = rows
        .iter()
        .map(|row| (row["UID"].as_str().unwrap().to_owned(), row))
        .collect();
    assert_eq!(by_uid["1"]["Annotations"]["safety"]["is_safe"], false);
    assert_eq!(by_uid["2"]["Annotations"]["safety"]["is_safe"], true);
}

#[test]
fn test_failed_ready_check_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());

    let mut suts = suts_of(vec![EchoSut::new("alive")]);
    let _ = suts.insert(
        "dead".to_owned(),
        Arc::new(DeadSut {
            uid: "dead".to_owned(),
        }) as Arc<dyn Sut>,
    );

    let error = PipelineRunner::new(&input, &dir.path().join("runs"))
        .with_suts(suts)
        .run(&NullRunTracker)
        .unwrap_err();
    match error {
        Error::Ready(ready) => {
            assert_eq!(ready.statuses.get("alive"), Some(&true));
            assert_eq!(ready.statuses.get("dead"), Some(&false));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_run_without_suts_or_annotators_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_prompts(dir.path());
    let error = PipelineRunner::new(&input, &dir.path().join("runs"))
        .run(&NullRunTracker)
        .unwrap_err();
    assert!(matches!(error, Error::Config(_)));
}
