// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Annotations: per-annotator labels for one interaction.

use crate::sut::TopTokens;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A free-form annotation: a structured object or a raw string, stored
/// verbatim and keyed by annotator uid on the interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Annotation(pub Value);

impl Annotation {
    /// Wraps a raw string annotation.
    pub fn text<S: Into<String>>(text: S) -> Self {
        Annotation(Value::String(text.into()))
    }

    /// Parses the annotation as a [`SafetyAnnotation`], if it is one.
    #[must_use]
    pub fn as_safety(&self) -> Option<SafetyAnnotation> {
        serde_json::from_value(self.0.clone()).ok()
    }
}

impl From<SafetyAnnotation> for Annotation {
    fn from(annotation: SafetyAnnotation) -> Self {
        Annotation(serde_json::to_value(annotation).unwrap_or(Value::Null))
    }
}

impl From<EnsembleSafetyAnnotation> for Annotation {
    fn from(annotation: EnsembleSafetyAnnotation) -> Self {
        Annotation(serde_json::to_value(annotation).unwrap_or(Value::Null))
    }
}

/// The structured annotation produced by safety annotators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAnnotation {
    /// Whether the response was judged safe.
    pub is_safe: bool,
    /// Whether the annotator produced a usable judgement.
    #[serde(default = "default_true")]
    pub is_valid: bool,
    /// Per-token log probabilities, when the annotator exposes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<Vec<TopTokens>>,
    /// Annotator-specific extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl SafetyAnnotation {
    /// A minimal valid judgement.
    #[must_use]
    pub fn new(is_safe: bool) -> Self {
        SafetyAnnotation {
            is_safe,
            is_valid: true,
            top_logprobs: None,
            metadata: None,
        }
    }
}

/// A safety annotation computed by an ensemble, keeping the member responses
/// it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSafetyAnnotation {
    /// The combined judgement.
    #[serde(flatten)]
    pub annotation: SafetyAnnotation,
    /// The member annotations the vote was computed from, keyed by
    /// annotator uid.
    pub joined_responses: BTreeMap<String, SafetyAnnotation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annotation_round_trips_through_json() {
        let annotation: Annotation = SafetyAnnotation::new(false).into();
        let encoded = serde_json::to_string(&annotation).unwrap();
        let decoded: Annotation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, annotation);
        let safety = decoded.as_safety().unwrap();
        assert!(!safety.is_safe);
        assert!(safety.is_valid);
    }

    #[test]
    fn test_raw_string_annotations_are_preserved() {
        let annotation = Annotation::text("unsafe: S1");
        assert_eq!(annotation.0, json!("unsafe: S1"));
        assert!(annotation.as_safety().is_none());
    }

    #[test]
    fn test_ensemble_annotation_keeps_member_responses() {
        let mut joined = BTreeMap::new();
        let _ = joined.insert("a".to_owned(), SafetyAnnotation::new(true));
        let _ = joined.insert("b".to_owned(), SafetyAnnotation::new(false));
        let ensemble = EnsembleSafetyAnnotation {
            annotation: SafetyAnnotation::new(false),
            joined_responses: joined,
        };
        let value = serde_json::to_value(&ensemble).unwrap();
        assert_eq!(value["is_safe"], json!(false));
        assert_eq!(value["joined_responses"]["a"]["is_safe"], json!(true));
    }
}
