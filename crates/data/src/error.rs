// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for datasets and writers.

use std::fmt::Write;
use std::path::PathBuf;

/// Errors raised while reading or writing datasets.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The input file's header lacks required columns. Each entry lists the
    /// accepted alternatives for one missing column.
    #[error("{}", format_missing_columns(.0))]
    MissingColumns(Vec<Vec<String>>),

    /// A row has no value for a bound column.
    #[error("row {row} is missing a value for column {column}")]
    MissingValue {
        /// 1-based data row number.
        row: u64,
        /// The bound column name.
        column: String,
    },

    /// The output path has the wrong extension for this writer.
    #[error("invalid output file {path}: must be of type {expected}")]
    InvalidOutputPath {
        /// The rejected path.
        path: PathBuf,
        /// The required extension.
        expected: &'static str,
    },

    /// The CSV layer failed.
    #[error("csv failure: {0}")]
    Csv(#[from] csv::Error),

    /// Encoding a JSONL row failed.
    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    /// The filesystem failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

fn format_missing_columns(missing: &[Vec<String>]) -> String {
    let mut message = String::from("Missing required columns:");
    for alternatives in missing {
        match alternatives.as_slice() {
            [only] => {
                let _ = write!(message, "\n\t{only}");
            }
            many => {
                let _ = write!(message, "\n\tone of: {}", many.join(", "));
            }
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_lists_alternatives() {
        let error = Error::MissingColumns(vec![
            vec!["prompt_text".to_owned()],
            vec!["sut_uid".to_owned(), "sut".to_owned()],
        ]);
        let message = error.to_string();
        assert!(message.contains("\tprompt_text"));
        assert!(message.contains("one of: sut_uid, sut"));
    }
}
