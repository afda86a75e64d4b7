// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Case-insensitive header schemas for input files.
//!
//! Input files come from many hands, so every logical column accepts a few
//! spellings and matching ignores case. The first listed name is the
//! preferred one and what output files use. Binding fails up front with the
//! complete list of missing columns rather than one at a time.

use crate::error::Error;

/// Accepted spellings of the prompt uid column, preferred first.
pub const PROMPT_UID_COLS: &[&str] = &["prompt_uid", "release_prompt_id"];
/// Accepted spellings of the prompt text column, preferred first.
pub const PROMPT_TEXT_COLS: &[&str] = &["prompt_text"];
/// Accepted spellings of the SUT uid column, preferred first.
pub const SUT_UID_COLS: &[&str] = &["sut_uid", "sut"];
/// Accepted spellings of the SUT response column, preferred first.
pub const SUT_RESPONSE_COLS: &[&str] = &["sut_response", "response_text", "response"];

/// A header column a schema successfully bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundColumn {
    /// Position in the header.
    pub index: usize,
    /// The header's own spelling of the name.
    pub name: String,
}

fn find_column(header: &[String], candidates: &[String]) -> Option<BoundColumn> {
    header.iter().enumerate().find_map(|(index, name)| {
        let lowered = name.to_lowercase();
        candidates
            .iter()
            .any(|candidate| candidate.to_lowercase() == lowered)
            .then(|| BoundColumn {
                index,
                name: name.clone(),
            })
    })
}

fn effective(default: &[&str], override_name: Option<&str>) -> Vec<String> {
    match override_name {
        Some(name) => vec![name.to_owned()],
        None => default.iter().map(|name| (*name).to_owned()).collect(),
    }
}

/// Schema for a prompts file used as SUT input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSchema {
    /// The prompt uid column.
    pub prompt_uid: BoundColumn,
    /// The prompt text column.
    pub prompt_text: BoundColumn,
}

impl PromptSchema {
    /// Binds the schema against a header, optionally overriding the accepted
    /// column names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingColumns`] listing every unbound column.
    pub fn bind(
        header: &[String],
        prompt_uid_col: Option<&str>,
        prompt_text_col: Option<&str>,
    ) -> Result<Self, Error> {
        let uid_candidates = effective(PROMPT_UID_COLS, prompt_uid_col);
        let text_candidates = effective(PROMPT_TEXT_COLS, prompt_text_col);
        let prompt_uid = find_column(header, &uid_candidates);
        let prompt_text = find_column(header, &text_candidates);

        let mut missing = Vec::new();
        if prompt_uid.is_none() {
            missing.push(uid_candidates);
        }
        if prompt_text.is_none() {
            missing.push(text_candidates);
        }
        match (prompt_uid, prompt_text) {
            (Some(prompt_uid), Some(prompt_text)) => Ok(PromptSchema {
                prompt_uid,
                prompt_text,
            }),
            _ => Err(Error::MissingColumns(missing)),
        }
    }
}

/// Schema for a prompt + response file: prompt-response output, annotation
/// input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptResponseSchema {
    /// The prompt columns.
    pub prompt: PromptSchema,
    /// The SUT uid column.
    pub sut_uid: BoundColumn,
    /// The SUT response column.
    pub sut_response: BoundColumn,
}

impl PromptResponseSchema {
    /// Binds the schema against a header, optionally overriding the accepted
    /// column names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingColumns`] listing every unbound column,
    /// including the prompt ones.
    pub fn bind(
        header: &[String],
        prompt_uid_col: Option<&str>,
        prompt_text_col: Option<&str>,
        sut_uid_col: Option<&str>,
        sut_response_col: Option<&str>,
    ) -> Result<Self, Error> {
        let sut_uid_candidates = effective(SUT_UID_COLS, sut_uid_col);
        let response_candidates = effective(SUT_RESPONSE_COLS, sut_response_col);
        let sut_uid = find_column(header, &sut_uid_candidates);
        let sut_response = find_column(header, &response_candidates);

        let prompt = PromptSchema::bind(header, prompt_uid_col, prompt_text_col);

        let mut missing = match &prompt {
            Ok(_) => Vec::new(),
            Err(Error::MissingColumns(missing)) => missing.clone(),
            Err(_) => Vec::new(),
        };
        if sut_uid.is_none() {
            missing.push(sut_uid_candidates);
        }
        if sut_response.is_none() {
            missing.push(response_candidates);
        }

        match (prompt, sut_uid, sut_response) {
            (Ok(prompt), Some(sut_uid), Some(sut_response)) => Ok(PromptResponseSchema {
                prompt,
                sut_uid,
                sut_response,
            }),
            _ => Err(Error::MissingColumns(missing)),
        }
    }
}
