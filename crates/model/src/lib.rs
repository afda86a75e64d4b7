// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The domain model shared by every layer of the engine.
//!
//! This crate defines what flows through the pipeline — prompts,
//! [`TestItem`]s, SUT responses, interactions and annotations — and the
//! contracts the engine holds its external collaborators to: the
//! [`Sut`] and [`Annotator`] traits, their capability flags, the uid-keyed
//! [`InstanceFactory`], secret declarations, the bounded [`RetryPolicy`] and
//! the pre-flight readiness probes.
//!
//! Concrete SUT and annotator clients live outside this workspace; the
//! engine only ever sees them through the traits defined here.

pub mod annotation;
pub mod annotator;
pub mod canonical;
pub mod error;
pub mod item;
pub mod options;
pub mod prompt;
pub mod ready;
pub mod registry;
pub mod retry;
pub mod secrets;
pub mod sut;

pub use annotation::{Annotation, EnsembleSafetyAnnotation, SafetyAnnotation};
pub use annotator::{Annotator, AnnotatorError, AnnotatorRequest};
pub use canonical::canonical_json;
pub use error::ConfigError;
pub use item::{AnnotatedInteraction, SutInteraction, TestItem, TokenProb, TopTokens};
pub use options::ModelOptions;
pub use prompt::TextPrompt;
pub use ready::{ReadyCheckError, ReadyReport, check_annotators_ready, check_suts_ready};
pub use registry::InstanceFactory;
pub use retry::RetryPolicy;
pub use secrets::{RawSecrets, SecretDescription, missing_secrets};
pub use sut::{
    Capability, RawResponse, Sut, SutError, SutRequest, SutResponse, assert_sut_capabilities,
};
