// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Secret declarations and lookup.
//!
//! How secrets reach the process (files, environment, vaults) is the
//! embedding application's business. The engine only needs to look values up
//! by scope and key, and to fail fast — before any pipeline starts — when a
//! required secret is absent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Secrets grouped by scope: `secrets["together"]["api_key"]`.
pub type RawSecrets = HashMap<String, HashMap<String, String>>;

/// Describes one secret a SUT or annotator needs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecretDescription {
    /// The scope (usually a provider name) the secret lives under.
    pub scope: String,
    /// The key within the scope.
    pub key: String,
    /// Where an operator can obtain the secret.
    pub instructions: String,
}

impl SecretDescription {
    /// Creates a description.
    pub fn new<S1, S2, S3>(scope: S1, key: S2, instructions: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        SecretDescription {
            scope: scope.into(),
            key: key.into(),
            instructions: instructions.into(),
        }
    }

    /// Looks this secret up in `secrets`.
    #[must_use]
    pub fn lookup<'a>(&self, secrets: &'a RawSecrets) -> Option<&'a str> {
        secrets
            .get(&self.scope)
            .and_then(|scope| scope.get(&self.key))
            .map(String::as_str)
    }
}

impl fmt::Display for SecretDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} ({})", self.scope, self.key, self.instructions)
    }
}

/// Returns the subset of `required` that `secrets` does not provide.
#[must_use]
pub fn missing_secrets(required: &[SecretDescription], secrets: &RawSecrets) -> Vec<SecretDescription> {
    required
        .iter()
        .filter(|description| description.lookup(secrets).is_none())
        .cloned()
        .collect()
}
