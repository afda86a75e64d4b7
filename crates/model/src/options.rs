// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Generation options passed through to SUTs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

fn default_max_tokens() -> u32 {
    100
}

/// An exhaustive set of options that could potentially be desired by a
/// model.
///
/// Not all SUTs and annotators respect all options. Unset options are
/// omitted from serialized requests so they never perturb cache keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Maximum number of tokens to generate (per completion).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Maximum number of tokens for all generated SUT output, including
    /// reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_output_tokens: Option<u32>,

    /// Temperature parameter that governs diversity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Take this many highest probability candidates per token in the
    /// completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k_per_token: Option<u32>,

    /// Stop generating once we hit one of these strings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Sample from tokens that occupy this probability mass (nucleus
    /// sampling).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Penalize repetition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,

    /// Penalize repetition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,

    /// Used to control randomness. Expect different responses for the same
    /// request but with different values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<String>,

    /// If present, request the log probabilities for this many of the top
    /// tokens at each position. SUTs must declare
    /// [`Capability::ProducesPerTokenLogProbabilities`] for this to be
    /// honored.
    ///
    /// [`Capability::ProducesPerTokenLogProbabilities`]: crate::sut::Capability::ProducesPerTokenLogProbabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u32>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        ModelOptions {
            max_tokens: default_max_tokens(),
            max_total_output_tokens: None,
            temperature: None,
            top_k_per_token: None,
            stop_sequences: None,
            top_p: None,
            presence_penalty: None,
            frequency_penalty: None,
            random: None,
            top_logprobs: None,
        }
    }
}

impl ModelOptions {
    /// Builds options from the commonly overridden knobs.
    #[must_use]
    pub fn from_arguments(
        max_tokens: Option<u32>,
        temperature: Option<f64>,
        top_p: Option<f64>,
        top_k: Option<u32>,
        top_logprobs: Option<u32>,
    ) -> Self {
        let mut options = ModelOptions::default();
        if let Some(max_tokens) = max_tokens {
            options.max_tokens = max_tokens;
        }
        options.temperature = temperature;
        options.top_p = top_p;
        options.top_k_per_token = top_k;
        options.top_logprobs = top_logprobs;
        options
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOptions`] when
    /// `max_total_output_tokens` is smaller than `max_tokens`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(total) = self.max_total_output_tokens {
            if total < self.max_tokens {
                return Err(ConfigError::InvalidOptions(format!(
                    "max_total_output_tokens ({total}) must be >= max_tokens ({})",
                    self.max_tokens
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ModelOptions::default();
        assert_eq!(options.max_tokens, 100);
        assert!(options.temperature.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_unset_options_are_omitted_from_json() {
        let options = ModelOptions::default();
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json, serde_json::json!({"max_tokens": 100}));
    }

    #[test]
    fn test_total_output_tokens_must_cover_max_tokens() {
        let mut options = ModelOptions::default();
        options.max_total_output_tokens = Some(50);
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidOptions(_))
        ));
        options.max_total_output_tokens = Some(100);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_arguments_overrides() {
        let options = ModelOptions::from_arguments(Some(32), Some(0.5), None, Some(40), None);
        assert_eq!(options.max_tokens, 32);
        assert_eq!(options.temperature, Some(0.5));
        assert_eq!(options.top_k_per_token, Some(40));
        assert!(options.top_p.is_none());
    }
}
