// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The annotator contract.
//!
//! Annotators label a (prompt, SUT response) pair, typically for safety.
//! The contract is symmetric to the SUT one: translate, call out, translate
//! back. An annotator failure costs the item that one annotation — nothing
//! more.

use crate::annotation::Annotation;
use crate::canonical::canonical_json;
use crate::item::TestItem;
use crate::sut::{RawResponse, SutResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An annotator-native request, produced by `translate_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotatorRequest(pub Value);

impl AnnotatorRequest {
    /// The canonical JSON form used for cache keys.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        canonical_json(&self.0)
    }
}

/// Errors raised by annotator implementations.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct AnnotatorError {
    /// Human-readable description.
    pub message: String,
}

impl AnnotatorError {
    /// Creates an error.
    pub fn new<S: Into<String>>(message: S) -> Self {
        AnnotatorError {
            message: message.into(),
        }
    }
}

/// A component that labels (prompt, response) pairs.
///
/// Implementations must be safe to call from many worker threads at once.
pub trait Annotator: Send + Sync + std::fmt::Debug {
    /// Unique identifier for this annotator.
    fn uid(&self) -> &str;

    /// Converts an item and its SUT response into the annotator's native
    /// request.
    ///
    /// # Errors
    ///
    /// Returns an error when the pair cannot be expressed for this
    /// annotator.
    fn translate_request(
        &self,
        item: &TestItem,
        response: &SutResponse,
    ) -> Result<AnnotatorRequest, AnnotatorError>;

    /// Executes the request against the backing service.
    ///
    /// # Errors
    ///
    /// Returns an error when the service call failed.
    fn annotate(&self, request: &AnnotatorRequest) -> Result<RawResponse, AnnotatorError>;

    /// Converts a raw service response into an [`Annotation`].
    ///
    /// # Errors
    ///
    /// Returns an error when the raw response cannot be interpreted.
    fn translate_response(
        &self,
        request: &AnnotatorRequest,
        raw: &RawResponse,
    ) -> Result<Annotation, AnnotatorError>;
}
