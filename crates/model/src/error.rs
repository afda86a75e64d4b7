// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration errors.
//!
//! Everything in here is fatal and raised before a pipeline starts; nothing
//! in this module is used for per-item failures.

use crate::secrets::SecretDescription;
use crate::sut::Capability;
use std::fmt::Write;

/// A fatal configuration problem detected before the run starts.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Required secrets are absent from the provided configuration.
    #[error("{}", format_missing_secrets(.0))]
    MissingSecrets(Vec<SecretDescription>),

    /// No SUT or annotator is registered under the uid.
    #[error("unknown {kind} uid: {uid}")]
    UnknownUid {
        /// What kind of instance was looked up (`"sut"`, `"annotator"`).
        kind: &'static str,
        /// The uid that failed to resolve.
        uid: String,
    },

    /// A SUT does not declare a capability the run requires.
    #[error("sut {sut} lacks required capability {capability}")]
    MissingCapability {
        /// The offending SUT.
        sut: String,
        /// The missing capability.
        capability: Capability,
    },

    /// The model options are internally inconsistent.
    #[error("invalid model options: {0}")]
    InvalidOptions(String),

    /// The runner was asked to start without a required ingredient.
    #[error("incomplete run configuration: {0}")]
    Incomplete(&'static str),
}

fn format_missing_secrets(missing: &[SecretDescription]) -> String {
    let mut message = String::from("missing secrets:");
    for description in missing {
        let _ = write!(message, "\n\t{description}");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_secrets_lists_every_entry() {
        let error = ConfigError::MissingSecrets(vec![
            SecretDescription::new("together", "api_key", "see docs"),
            SecretDescription::new("mistral", "api_key", "see docs"),
        ]);
        let message = error.to_string();
        assert!(message.contains("together.api_key"));
        assert!(message.contains("mistral.api_key"));
    }
}
