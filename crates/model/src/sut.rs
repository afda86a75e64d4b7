// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The system-under-test contract.
//!
//! A SUT is a language model behind some client. The engine never speaks a
//! provider protocol itself; it drives the three-step triple
//! `translate_text_prompt → evaluate → translate_response` and treats the
//! request and raw response as opaque JSON. `evaluate` is the only step
//! expected to touch the network, and the only one callers retry.

use crate::canonical::canonical_json;
use crate::error::ConfigError;
use crate::options::ModelOptions;
use crate::prompt::TextPrompt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Capabilities a SUT may declare and a run may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Can take a [`TextPrompt`] as input.
    AcceptsTextPrompt,
    /// Can take a multi-turn chat prompt as input.
    AcceptsChatPrompt,
    /// Sets per-token top log-probabilities on its responses when asked.
    ProducesPerTokenLogProbabilities,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Capability::AcceptsTextPrompt => "AcceptsTextPrompt",
            Capability::AcceptsChatPrompt => "AcceptsChatPrompt",
            Capability::ProducesPerTokenLogProbabilities => "ProducesPerTokenLogProbabilities",
        };
        write!(f, "{label}")
    }
}

/// A SUT-native request, produced by `translate_text_prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SutRequest(pub Value);

impl SutRequest {
    /// The canonical JSON form used for cache keys.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        canonical_json(&self.0)
    }
}

/// The raw, untranslated response from a SUT's backing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResponse(pub Value);

/// One candidate token with its log probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenProb {
    /// The token text.
    pub token: String,
    /// Its log probability.
    pub logprob: f64,
}

/// The top-k candidates for one token position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTokens {
    /// Candidates, most probable first.
    pub top_tokens: Vec<TokenProb>,
}

/// The translated response the rest of the engine works with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SutResponse {
    /// The generated text.
    pub text: String,
    /// Per-position top tokens, present only when requested and supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<Vec<TopTokens>>,
}

impl SutResponse {
    /// A plain text response.
    pub fn new<S: Into<String>>(text: S) -> Self {
        SutResponse {
            text: text.into(),
            top_logprobs: None,
        }
    }
}

/// Errors raised by SUT implementations.
#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct SutError {
    /// Human-readable description.
    pub message: String,
    /// Whether the failure is worth retrying for a long time (rate limits,
    /// transient network trouble) rather than a bounded number of times.
    pub transient: bool,
}

impl SutError {
    /// A non-transient failure.
    pub fn new<S: Into<String>>(message: S) -> Self {
        SutError {
            message: message.into(),
            transient: false,
        }
    }

    /// A transient failure worth retrying for a long time.
    pub fn transient<S: Into<String>>(message: S) -> Self {
        SutError {
            message: message.into(),
            transient: true,
        }
    }
}

/// A system under test.
///
/// Implementations must be safe to call from many worker threads at once.
pub trait Sut: Send + Sync {
    /// Unique identifier for this SUT.
    fn uid(&self) -> &str;

    /// The capabilities this SUT declares.
    fn capabilities(&self) -> &[Capability];

    /// Converts a text prompt into the SUT's native request.
    ///
    /// # Errors
    ///
    /// Returns an error when the prompt or options cannot be expressed for
    /// this SUT.
    fn translate_text_prompt(
        &self,
        prompt: &TextPrompt,
        options: &ModelOptions,
    ) -> Result<SutRequest, SutError>;

    /// Executes the request against the backing service. May fail; callers
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns an error when the service call failed.
    fn evaluate(&self, request: &SutRequest) -> Result<RawResponse, SutError>;

    /// Converts a raw service response into a [`SutResponse`].
    ///
    /// # Errors
    ///
    /// Returns an error when the raw response cannot be interpreted.
    fn translate_response(
        &self,
        request: &SutRequest,
        raw: &RawResponse,
    ) -> Result<SutResponse, SutError>;
}

/// Checks that every SUT declares every required capability.
///
/// # Errors
///
/// Returns [`ConfigError::MissingCapability`] naming the first violation.
pub fn assert_sut_capabilities<'a, I>(suts: I, required: &[Capability]) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = &'a dyn Sut>,
{
    for sut in suts {
        for capability in required {
            if !sut.capabilities().contains(capability) {
                return Err(ConfigError::MissingCapability {
                    sut: sut.uid().to_owned(),
                    capability: *capability,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct StubSut {
        uid: String,
        capabilities: Vec<Capability>,
    }

    impl Sut for StubSut {
        fn uid(&self) -> &str {
            &self.uid
        }

        fn capabilities(&self) -> &[Capability] {
            &self.capabilities
        }

        fn translate_text_prompt(
            &self,
            prompt: &TextPrompt,
            options: &ModelOptions,
        ) -> Result<SutRequest, SutError> {
            Ok(SutRequest(json!({
                "prompt": prompt.text,
                "max_tokens": options.max_tokens,
            })))
        }

        fn evaluate(&self, _request: &SutRequest) -> Result<RawResponse, SutError> {
            Ok(RawResponse(json!({"completion": "ok"})))
        }

        fn translate_response(
            &self,
            _request: &SutRequest,
            raw: &RawResponse,
        ) -> Result<SutResponse, SutError> {
            let text = raw.0["completion"].as_str().unwrap_or_default();
            Ok(SutResponse::new(text))
        }
    }

    #[test]
    fn test_capability_check_passes_when_declared() {
        let sut = StubSut {
            uid: "stub".to_owned(),
            capabilities: vec![Capability::AcceptsTextPrompt],
        };
        let suts: Vec<&dyn Sut> = vec![&sut];
        assert!(assert_sut_capabilities(suts, &[Capability::AcceptsTextPrompt]).is_ok());
    }

    #[test]
    fn test_capability_check_names_the_offender() {
        let sut = StubSut {
            uid: "stub".to_owned(),
            capabilities: vec![Capability::AcceptsTextPrompt],
        };
        let suts: Vec<&dyn Sut> = vec![&sut];
        let error = assert_sut_capabilities(
            suts,
            &[
                Capability::AcceptsTextPrompt,
                Capability::ProducesPerTokenLogProbabilities,
            ],
        )
        .unwrap_err();
        match error {
            ConfigError::MissingCapability { sut, capability } => {
                assert_eq!(sut, "stub");
                assert_eq!(capability, Capability::ProducesPerTokenLogProbabilities);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_request_canonical_json_is_stable() {
        let request = SutRequest(json!({"b": 1, "a": null}));
        assert_eq!(request.canonical_json(), r#"{"b":1}"#);
    }
}
