// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Ensemble voting over member annotations.
//!
//! The voter sits between the annotator workers and the sink. It forwards
//! every triple untouched and buffers the ones produced by its member
//! annotators; once an interaction has a response from every member, it
//! emits one synthetic `(interaction, "ensemble", vote)` triple. How the
//! member annotations combine is the strategy's business — invalid member
//! annotations are the strategy's to tolerate, strategy errors drop the
//! vote.

use parking_lot::Mutex;
use safebench_engine::{Emitter, Error, Pipe};
use safebench_model::{AnnotatedInteraction, Annotation, AnnotatorError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// The annotator uid under which ensemble votes are recorded.
pub const ENSEMBLE_UID: &str = "ensemble";

/// Combines member annotations into one vote.
pub trait EnsembleStrategy: Send + Sync {
    /// Computes the combined annotation from the members' annotations,
    /// keyed by annotator uid.
    ///
    /// # Errors
    ///
    /// Returns an error when no vote can be computed; the interaction then
    /// never gets an ensemble entry.
    fn compute_response(
        &self,
        annotations: &BTreeMap<String, Annotation>,
    ) -> Result<Annotation, AnnotatorError>;
}

/// An ensemble: which annotators vote and how the votes combine.
#[derive(Clone)]
pub struct EnsembleSpec {
    /// The member annotator uids.
    pub annotators: BTreeSet<String>,
    /// The voting strategy.
    pub strategy: Arc<dyn EnsembleStrategy>,
}

impl EnsembleSpec {
    /// Creates a spec.
    pub fn new<I, S>(annotators: I, strategy: Arc<dyn EnsembleStrategy>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnsembleSpec {
            annotators: annotators.into_iter().map(Into::into).collect(),
            strategy,
        }
    }
}

/// Forwards every annotation and adds an ensemble vote per interaction once
/// all members have reported.
pub struct EnsembleVoter {
    spec: EnsembleSpec,
    pending: Mutex<HashMap<(String, String), BTreeMap<String, Annotation>>>,
    votes: Arc<AtomicU64>,
}

impl EnsembleVoter {
    /// Creates the voter.
    #[must_use]
    pub fn new(spec: EnsembleSpec) -> Self {
        EnsembleVoter {
            spec,
            pending: Mutex::new(HashMap::new()),
            votes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle to the number of votes emitted.
    #[must_use]
    pub fn vote_count(&self) -> Arc<AtomicU64> {
        self.votes.clone()
    }
}

impl Pipe for EnsembleVoter {
    type Input = AnnotatedInteraction;
    type Output = AnnotatedInteraction;

    fn handle_item(
        &self,
        item: AnnotatedInteraction,
        out: &Emitter<'_, AnnotatedInteraction>,
    ) -> Result<(), Error> {
        out.put(item.clone());
        if !self.spec.annotators.contains(&item.annotator_uid) {
            return Ok(());
        }

        let key = item.interaction.key();
        let collected = {
            let mut pending = self.pending.lock();
            let entry = pending.entry(key.clone()).or_default();
            let _ = entry.insert(item.annotator_uid.clone(), item.annotation.clone());
            if entry.len() == self.spec.annotators.len() {
                pending.remove(&key)
            } else {
                None
            }
        };

        if let Some(collected) = collected {
            let vote = self
                .spec
                .strategy
                .compute_response(&collected)
                .map_err(Error::handler)?;
            let _ = self.votes.fetch_add(1, Ordering::Relaxed);
            out.put(AnnotatedInteraction {
                interaction: item.interaction,
                annotator_uid: ENSEMBLE_UID.to_owned(),
                annotation: vote,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safebench_model::{SafetyAnnotation, SutInteraction, SutResponse, TestItem, TextPrompt};

    struct AllSafe;

    impl EnsembleStrategy for AllSafe {
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

    struct Failing;

    impl EnsembleStrategy for Failing {
        fn compute_response(
            &self,
            _annotations: &BTreeMap<String, Annotation>,
        ) -> Result<Annotation, AnnotatorError> {
            Err(AnnotatorError::new("failed to compute response"))
        }
    }

    fn annotated(uid: &str, safe: bool) -> AnnotatedInteraction {
        let item = TestItem::new("p1", TextPrompt::new("hello"));
        AnnotatedInteraction {
            interaction: SutInteraction::new(item, "demo_sut", SutResponse::new("hi")),
            annotator_uid: uid.to_owned(),
            annotation: SafetyAnnotation::new(safe).into(),
        }
    }

    fn run_voter(
        voter: &EnsembleVoter,
        items: Vec<AnnotatedInteraction>,
    ) -> Vec<AnnotatedInteraction> {
        let queue = safebench_channel::WorkQueue::new(0);
        let emitter = safebench_engine::testing_emitter(&queue);
        for item in items {
            let _ = voter.handle_item(item, &emitter);
        }
        let mut emitted = Vec::new();
        while let Ok(item) = queue.get(std::time::Duration::from_millis(1)) {
            emitted.push(item);
        }
        emitted
    }

    #[test]
    fn test_vote_emitted_once_all_members_report() {
        let voter = EnsembleVoter::new(EnsembleSpec::new(["a", "b"], Arc::new(AllSafe)));
        let votes = voter.vote_count();
        let emitted = run_voter(&voter, vec![annotated("a", true), annotated("b", false)]);

        // Two forwarded triples plus one synthetic ensemble triple.
        assert_eq!(emitted.len(), 3);
        let vote = emitted
            .iter()
            .find(|item| item.annotator_uid == ENSEMBLE_UID)
            .unwrap();
        assert!(!vote.annotation.as_safety().unwrap().is_safe);
        assert_eq!(votes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_non_member_annotations_are_forwarded_untouched() {
        let voter = EnsembleVoter::new(EnsembleSpec::new(["a", "b"], Arc::new(AllSafe)));
        let emitted = run_voter(&voter, vec![annotated("other", true), annotated("a", true)]);
        assert_eq!(emitted.len(), 2);
        assert!(emitted.iter().all(|item| item.annotator_uid != ENSEMBLE_UID));
    }

    #[test]
    fn test_strategy_errors_drop_the_vote_but_not_the_members() {
        let voter = EnsembleVoter::new(EnsembleSpec::new(["a", "b"], Arc::new(Failing)));
        let votes = voter.vote_count();
        let queue = safebench_channel::WorkQueue::new(0);
        let emitter = safebench_engine::testing_emitter(&queue);
        let _ = voter.handle_item(annotated("a", true), &emitter);
        let error = voter.handle_item(annotated("b", true), &emitter).unwrap_err();
        assert!(error.to_string().contains("failed to compute response"));
        assert_eq!(votes.load(Ordering::Relaxed), 0);
    }
}
