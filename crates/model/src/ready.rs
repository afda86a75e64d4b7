// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Pre-flight readiness probes.
//!
//! Before a run starts, every SUT and annotator gets one fixed smoke-test
//! call, in parallel. A run against a dead endpoint should die here, not
//! twenty minutes in. Any failure is fatal: the caller aborts with the full
//! uid → pass/fail listing.

use crate::annotator::Annotator;
use crate::item::TestItem;
use crate::options::ModelOptions;
use crate::prompt::TextPrompt;
use crate::sut::{Sut, SutResponse};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The fixed probe prompt sent to every SUT and annotator.
pub const PROBE_PROMPT: &str = "Why did the chicken cross the road?";
/// The canned response used when probing annotators.
pub const PROBE_RESPONSE: &str = "To get to the other side.";

/// Outcome of probing a set of SUTs or annotators.
#[derive(Debug, Clone, Default)]
pub struct ReadyReport {
    /// Pass/fail per uid.
    pub statuses: BTreeMap<String, bool>,
    /// Error text per failed uid.
    pub errors: BTreeMap<String, String>,
}

impl ReadyReport {
    /// Whether every probe passed.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.statuses.values().all(|ready| *ready)
    }

    /// Converts a failed report into the fatal pre-flight error.
    ///
    /// # Errors
    ///
    /// Returns [`ReadyCheckError`] when any probe failed.
    pub fn into_result(self, kind: &'static str) -> Result<(), ReadyCheckError> {
        if self.all_ready() {
            Ok(())
        } else {
            Err(ReadyCheckError {
                kind,
                statuses: self.statuses,
                errors: self.errors,
            })
        }
    }

    fn record(&mut self, uid: String, result: Result<(), String>) {
        match result {
            Ok(()) => {
                let _ = self.statuses.insert(uid, true);
            }
            Err(error) => {
                tracing::error!(uid = %uid, %error, "readiness probe failed");
                let _ = self.statuses.insert(uid.clone(), false);
                let _ = self.errors.insert(uid, error);
            }
        }
    }
}

/// Fatal pre-flight failure: one or more probes did not pass.
#[derive(thiserror::Error, Debug)]
pub struct ReadyCheckError {
    /// What was probed (`"sut"` or `"annotator"`).
    pub kind: &'static str,
    /// Pass/fail per uid.
    pub statuses: BTreeMap<String, bool>,
    /// Error text per failed uid.
    pub errors: BTreeMap<String, String>,
}

impl fmt::Display for ReadyCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not all {}s are ready to go. Status:", self.kind)?;
        for (uid, ready) in &self.statuses {
            write!(f, " {uid}={ready}")?;
        }
        Ok(())
    }
}

fn probe_sut(sut: &dyn Sut, options: &ModelOptions) -> Result<(), String> {
    let prompt = TextPrompt::new(PROBE_PROMPT);
    let request = sut
        .translate_text_prompt(&prompt, options)
        .map_err(|error| error.to_string())?;
    let raw = sut.evaluate(&request).map_err(|error| error.to_string())?;
    let response = sut
        .translate_response(&request, &raw)
        .map_err(|error| error.to_string())?;
    if response.text.is_empty() {
        return Err("probe returned an empty completion".to_owned());
    }
    Ok(())
}

fn probe_annotator(annotator: &dyn Annotator) -> Result<(), String> {
    let item = TestItem::new("ignored", TextPrompt::new(PROBE_PROMPT));
    let response = SutResponse::new(PROBE_RESPONSE);
    let request = annotator
        .translate_request(&item, &response)
        .map_err(|error| error.to_string())?;
    let raw = annotator
        .annotate(&request)
        .map_err(|error| error.to_string())?;
    let _annotation = annotator
        .translate_response(&request, &raw)
        .map_err(|error| error.to_string())?;
    Ok(())
}

/// Probes every SUT in parallel with the fixed smoke-test prompt.
#[must_use]
pub fn check_suts_ready(
    suts: &BTreeMap<String, Arc<dyn Sut>>,
    options: &ModelOptions,
) -> ReadyReport {
    let mut report = ReadyReport::default();
    let results: Vec<(String, Result<(), String>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = suts
            .iter()
            .map(|(uid, sut)| {
                let uid = uid.clone();
                let sut = sut.clone();
                scope.spawn(move || (uid, probe_sut(sut.as_ref(), options)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| ("<panicked>".to_owned(), Err("probe panicked".to_owned())))
            })
            .collect()
    });
    for (uid, result) in results {
        report.record(uid, result);
    }
    report
}

/// Probes every annotator in parallel with a canned prompt/response pair.
#[must_use]
pub fn check_annotators_ready(annotators: &BTreeMap<String, Arc<dyn Annotator>>) -> ReadyReport {
    let mut report = ReadyReport::default();
    let results: Vec<(String, Result<(), String>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = annotators
            .iter()
            .map(|(uid, annotator)| {
                let uid = uid.clone();
                let annotator = annotator.clone();
                scope.spawn(move || (uid, probe_annotator(annotator.as_ref())))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| ("<panicked>".to_owned(), Err("probe panicked".to_owned())))
            })
            .collect()
    });
    for (uid, result) in results {
        report.record(uid, result);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sut::{Capability, RawResponse, SutError, SutRequest};
    use serde_json::json;

    struct ProbeSut {
        uid: String,
        healthy: bool,
    }

    impl Sut for ProbeSut {
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
            if self.healthy {
                Ok(RawResponse(json!({"completion": "cluck"})))
            } else {
                Err(SutError::new("connection refused"))
            }
        }

        fn translate_response(
            &self,
            _request: &SutRequest,
            raw: &RawResponse,
        ) -> Result<SutResponse, SutError> {
            Ok(SutResponse::new(raw.0["completion"].as_str().unwrap_or("")))
        }
    }

    fn suts(healthy: &[(&str, bool)]) -> BTreeMap<String, Arc<dyn Sut>> {
        healthy
            .iter()
            .map(|(uid, healthy)| {
                let sut: Arc<dyn Sut> = Arc::new(ProbeSut {
                    uid: (*uid).to_owned(),
                    healthy: *healthy,
                });
                ((*uid).to_owned(), sut)
            })
            .collect()
    }

    #[test]
    fn test_all_healthy_suts_pass() {
        let report = check_suts_ready(&suts(&[("a", true), ("b", true)]), &ModelOptions::default());
        assert!(report.all_ready());
        assert!(report.into_result("sut").is_ok());
    }

    #[test]
    fn test_failing_sut_is_listed_with_status() {
        let report =
            check_suts_ready(&suts(&[("a", true), ("b", false)]), &ModelOptions::default());
        assert!(!report.all_ready());
        let error = report.into_result("sut").unwrap_err();
        assert_eq!(error.statuses.get("a"), Some(&true));
        assert_eq!(error.statuses.get("b"), Some(&false));
        assert!(error.to_string().contains("b=false"));
    }
}
