// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The units of work that flow through the pipeline.

use crate::annotation::Annotation;
use crate::prompt::TextPrompt;
use crate::sut::SutResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::hash::{Hash, Hasher};

/// The smallest unit a test can judge: one prompt plus whatever context the
/// test wants carried along.
///
/// Items are immutable once constructed. Identity (and therefore hashing)
/// covers the source id and the prompt text only — context never affects
/// where results land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestItem {
    /// The prompt sent to SUTs.
    pub prompt: TextPrompt,
    /// Identifier of this prompt in the underlying datasource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Opaque per-item context, forwarded untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl TestItem {
    /// Creates an item without context.
    pub fn new<S: Into<String>>(source_id: S, prompt: TextPrompt) -> Self {
        TestItem {
            prompt,
            source_id: Some(source_id.into()),
            context: None,
        }
    }

    /// Attaches context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl Hash for TestItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(source_id) = &self.source_id {
            source_id.hash(state);
        }
        self.prompt.text.hash(state);
    }
}

/// One candidate token with its log probability.
pub use crate::sut::TokenProb;
/// The top-k candidates for one token position.
pub use crate::sut::TopTokens;

/// One (prompt, SUT, response) triple. Created by a SUT worker; immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SutInteraction {
    /// The item the SUT responded to.
    pub item: TestItem,
    /// Which SUT responded.
    pub sut_uid: String,
    /// What it said.
    pub response: SutResponse,
}

impl SutInteraction {
    /// Creates an interaction.
    pub fn new<S: Into<String>>(item: TestItem, sut_uid: S, response: SutResponse) -> Self {
        SutInteraction {
            item,
            sut_uid: sut_uid.into(),
            response,
        }
    }

    /// Identity of this interaction: (source id ⊕ prompt text, sut uid).
    ///
    /// Two workers handling distinct (source_id, sut_uid) pairs always
    /// produce interactions with distinct keys.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        let item_id = self
            .item
            .source_id
            .clone()
            .unwrap_or_else(|| self.item.prompt.text.clone());
        (item_id, self.sut_uid.clone())
    }
}

impl Hash for SutInteraction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// One annotator's verdict on one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedInteraction {
    /// The interaction that was annotated.
    pub interaction: SutInteraction,
    /// Which annotator produced the verdict.
    pub annotator_uid: String,
    /// The verdict.
    pub annotation: Annotation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_item_hash_ignores_context() {
        let base = TestItem::new("p1", TextPrompt::new("hello"));
        let with_context = base.clone().with_context(serde_json::json!({"k": "v"}));
        assert_eq!(hash_of(&base), hash_of(&with_context));
    }

    #[test]
    fn test_item_hash_distinguishes_source_and_text() {
        let a = TestItem::new("p1", TextPrompt::new("hello"));
        let b = TestItem::new("p2", TextPrompt::new("hello"));
        let c = TestItem::new("p1", TextPrompt::new("goodbye"));
        assert_ne!(hash_of(&a), hash_of(&b));
        assert_ne!(hash_of(&a), hash_of(&c));
    }

    #[test]
    fn test_interaction_keys_are_distinct_per_item_and_sut() {
        let item = TestItem::new("p1", TextPrompt::new("hello"));
        let a = SutInteraction::new(item.clone(), "sut-a", SutResponse::new("x"));
        let b = SutInteraction::new(item, "sut-b", SutResponse::new("x"));
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_interaction_survives_json_round_trip() {
        let item = TestItem::new("p1", TextPrompt::new("hello"))
            .with_context(serde_json::json!({"category": "cse"}));
        let interaction = SutInteraction::new(item, "sut-a", SutResponse::new("hi"));
        let encoded = serde_json::to_vec(&interaction).unwrap();
        let decoded: SutInteraction = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, interaction);
    }
}
