// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Prompts sent to systems under test.

use serde::{Deserialize, Serialize};

/// A plain text prompt. What actually goes to the SUT.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextPrompt {
    /// The prompt text.
    pub text: String,
}

impl TextPrompt {
    /// Creates a prompt from anything string-like.
    pub fn new<S: Into<String>>(text: S) -> Self {
        TextPrompt { text: text.into() }
    }
}

impl From<&str> for TextPrompt {
    fn from(text: &str) -> Self {
        TextPrompt::new(text)
    }
}
