// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Datasets: typed readers and writers over the engine's file formats.
//!
//! Readers validate their header at open time, then hand out fresh row
//! iterators on demand. Row iterators yield `Result`s so that one malformed
//! row surfaces as an error item instead of tearing the file down.

use crate::error::Error;
use crate::schema::{PromptResponseSchema, PromptSchema};
use safebench_model::{Annotation, SutInteraction, SutResponse, TestItem, TextPrompt};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

fn read_header(path: &Path) -> Result<Vec<String>, Error> {
    let mut reader = csv::Reader::from_path(path)?;
    Ok(reader
        .headers()?
        .iter()
        .map(|name| name.to_owned())
        .collect())
}

fn row_context(header: &[String], record: &csv::StringRecord) -> Value {
    let mut context = Map::new();
    for (index, name) in header.iter().enumerate() {
        let value = record.get(index).unwrap_or_default();
        let _ = context.insert(name.clone(), Value::String(value.to_owned()));
    }
    Value::Object(context)
}

fn required_field(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    row: u64,
) -> Result<String, Error> {
    record
        .get(index)
        .map(|value| value.to_owned())
        .ok_or_else(|| Error::MissingValue {
            row,
            column: name.to_owned(),
        })
}

/// A CSV file of prompts used as SUT input.
///
/// Recognised columns: `prompt_uid` (or `release_prompt_id`) and
/// `prompt_text`, case-insensitive. Every other column is preserved as
/// per-row context.
#[derive(Debug)]
pub struct PromptDataset {
    path: PathBuf,
    header: Vec<String>,
    schema: PromptSchema,
}

impl PromptDataset {
    /// Opens `path` and validates its header.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or required columns are
    /// missing.
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::open_with_columns(path, None, None)
    }

    /// Opens `path` with explicit column-name overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or required columns are
    /// missing.
    pub fn open_with_columns(
        path: &Path,
        prompt_uid_col: Option<&str>,
        prompt_text_col: Option<&str>,
    ) -> Result<Self, Error> {
        let header = read_header(path)?;
        let schema = PromptSchema::bind(&header, prompt_uid_col, prompt_text_col)?;
        Ok(PromptDataset {
            path: path.to_path_buf(),
            header,
            schema,
        })
    }

    /// The file this dataset reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh iterator over the file's rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be re-opened.
    pub fn iter(&self) -> Result<PromptRows, Error> {
        let reader = csv::Reader::from_path(&self.path)?;
        Ok(PromptRows {
            records: reader.into_records(),
            header: self.header.clone(),
            schema: self.schema.clone(),
            row: 0,
        })
    }

    /// Counts the data rows in the file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be re-opened.
    pub fn item_count(&self) -> Result<usize, Error> {
        let reader = csv::Reader::from_path(&self.path)?;
        Ok(reader.into_records().count())
    }
}

/// Row iterator over a [`PromptDataset`].
pub struct PromptRows {
    records: csv::StringRecordsIntoIter<File>,
    header: Vec<String>,
    schema: PromptSchema,
    row: u64,
}

impl Iterator for PromptRows {
    type Item = Result<TestItem, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.row += 1;
        Some(record.map_err(Error::from).and_then(|record| {
            let source_id = required_field(
                &record,
                self.schema.prompt_uid.index,
                &self.schema.prompt_uid.name,
                self.row,
            )?;
            let text = required_field(
                &record,
                self.schema.prompt_text.index,
                &self.schema.prompt_text.name,
                self.row,
            )?;
            Ok(TestItem::new(source_id, TextPrompt::new(text))
                .with_context(row_context(&self.header, &record)))
        }))
    }
}

/// A CSV file of (prompt, SUT, response) rows used as annotator input.
pub struct PromptResponseDataset {
    path: PathBuf,
    header: Vec<String>,
    schema: PromptResponseSchema,
}

impl PromptResponseDataset {
    /// Opens `path` and validates its header.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or required columns are
    /// missing.
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::open_with_columns(path, None, None, None, None)
    }

    /// Opens `path` with explicit column-name overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or required columns are
    /// missing.
    pub fn open_with_columns(
        path: &Path,
        prompt_uid_col: Option<&str>,
        prompt_text_col: Option<&str>,
        sut_uid_col: Option<&str>,
        sut_response_col: Option<&str>,
    ) -> Result<Self, Error> {
        let header = read_header(path)?;
        let schema = PromptResponseSchema::bind(
            &header,
            prompt_uid_col,
            prompt_text_col,
            sut_uid_col,
            sut_response_col,
        )?;
        Ok(PromptResponseDataset {
            path: path.to_path_buf(),
            header,
            schema,
        })
    }

    /// The file this dataset reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a fresh iterator over the file's rows.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be re-opened.
    pub fn iter(&self) -> Result<PromptResponseRows, Error> {
        let reader = csv::Reader::from_path(&self.path)?;
        Ok(PromptResponseRows {
            records: reader.into_records(),
            header: self.header.clone(),
            schema: self.schema.clone(),
            row: 0,
        })
    }

    /// Counts the data rows in the file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be re-opened.
    pub fn item_count(&self) -> Result<usize, Error> {
        let reader = csv::Reader::from_path(&self.path)?;
        Ok(reader.into_records().count())
    }
}

/// Row iterator over a [`PromptResponseDataset`].
pub struct PromptResponseRows {
    records: csv::StringRecordsIntoIter<File>,
    header: Vec<String>,
    schema: PromptResponseSchema,
    row: u64,
}

impl Iterator for PromptResponseRows {
    type Item = Result<SutInteraction, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.row += 1;
        Some(record.map_err(Error::from).and_then(|record| {
            let prompt = &self.schema.prompt;
            let source_id =
                required_field(&record, prompt.prompt_uid.index, &prompt.prompt_uid.name, self.row)?;
            let text =
                required_field(&record, prompt.prompt_text.index, &prompt.prompt_text.name, self.row)?;
            let sut_uid = required_field(
                &record,
                self.schema.sut_uid.index,
                &self.schema.sut_uid.name,
                self.row,
            )?;
            let response = required_field(
                &record,
                self.schema.sut_response.index,
                &self.schema.sut_response.name,
                self.row,
            )?;
            let item = TestItem::new(source_id, TextPrompt::new(text))
                .with_context(row_context(&self.header, &record));
            Ok(SutInteraction::new(item, sut_uid, SutResponse::new(response)))
        }))
    }
}

/// Writes the prompt-response CSV:
/// `prompt_uid, prompt_text, sut_uid, sut_response`.
pub struct PromptResponseWriter {
    writer: csv::Writer<File>,
}

impl PromptResponseWriter {
    /// Creates `path` and writes the header row.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["prompt_uid", "prompt_text", "sut_uid", "sut_response"])?;
        Ok(PromptResponseWriter { writer })
    }

    /// Appends one interaction.
    ///
    /// # Errors
    ///
    /// Returns an error when the row cannot be written.
    pub fn write(&mut self, interaction: &SutInteraction) -> Result<(), Error> {
        self.writer.write_record([
            interaction.item.source_id.as_deref().unwrap_or_default(),
            interaction.item.prompt.text.as_str(),
            interaction.sut_uid.as_str(),
            interaction.response.text.as_str(),
        ])?;
        Ok(())
    }

    /// Flushes buffered rows to disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the flush fails.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes the annotations JSONL: one object per interaction with its full
/// annotation map.
#[derive(Debug)]
pub struct AnnotationWriter {
    out: BufWriter<File>,
}

impl AnnotationWriter {
    /// Creates `path`, which must end in `.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error when the extension is wrong or the file cannot be
    /// created.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let extension = path.extension().and_then(|ext| ext.to_str());
        if !extension.is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl")) {
            return Err(Error::InvalidOutputPath {
                path: path.to_path_buf(),
                expected: "JSONL",
            });
        }
        Ok(AnnotationWriter {
            out: BufWriter::new(File::create(path)?),
        })
    }

    /// Appends one interaction with its annotations.
    ///
    /// # Errors
    ///
    /// Returns an error when the row cannot be encoded or written.
    pub fn write(
        &mut self,
        interaction: &SutInteraction,
        annotations: &BTreeMap<String, Annotation>,
    ) -> Result<(), Error> {
        let row = serde_json::json!({
            "UID": interaction.item.source_id.as_deref().unwrap_or_default(),
            "Prompt": interaction.item.prompt.text,
            "SUT": interaction.sut_uid,
            "Response": interaction.response.text,
            "Annotations": annotations,
        });
        serde_json::to_writer(&mut self.out, &row)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes buffered rows to disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the flush fails.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safebench_model::SafetyAnnotation;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_prompt_dataset_reads_items_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "prompts.csv",
            "prompt_uid,prompt_text,hazard\np1,say hi,cse\np2,say bye,vcr\n",
        );
        let dataset = PromptDataset::open(&path).unwrap();
        assert_eq!(dataset.item_count().unwrap(), 2);

        let items: Vec<TestItem> = dataset.iter().unwrap().map(|item| item.unwrap()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].source_id.as_deref(), Some("p1"));
        assert_eq!(items[0].prompt.text, "say hi");
        let context = items[0].context.as_ref().unwrap();
        assert_eq!(context["hazard"], "cse");
    }

    #[test]
    fn test_prompt_dataset_rejects_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "bad.csv", "id,text\n1,hello\n");
        let error = PromptDataset::open(&path).unwrap_err();
        assert!(matches!(error, Error::MissingColumns(_)));
    }

    #[test]
    fn test_prompt_response_dataset_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.csv");
        {
            let mut writer = PromptResponseWriter::create(&path).unwrap();
            let item = TestItem::new("p1", TextPrompt::new("say hi"));
            writer
                .write(&SutInteraction::new(item, "demo_sut", SutResponse::new("hi")))
                .unwrap();
            writer.flush().unwrap();
        }

        let dataset = PromptResponseDataset::open(&path).unwrap();
        let interactions: Vec<SutInteraction> =
            dataset.iter().unwrap().map(|row| row.unwrap()).collect();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].item.source_id.as_deref(), Some("p1"));
        assert_eq!(interactions[0].sut_uid, "demo_sut");
        assert_eq!(interactions[0].response.text, "hi");
    }

    #[test]
    fn test_prompt_response_dataset_accepts_legacy_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "aliases.csv",
            "release_prompt_id,prompt_text,sut,response\np1,say hi,demo,hello\n",
        );
        let dataset = PromptResponseDataset::open(&path).unwrap();
        let interactions: Vec<SutInteraction> =
            dataset.iter().unwrap().map(|row| row.unwrap()).collect();
        assert_eq!(interactions[0].sut_uid, "demo");
    }

    #[test]
    fn test_annotation_writer_produces_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.jsonl");
        {
            let mut writer = AnnotationWriter::create(&path).unwrap();
            let item = TestItem::new("p1", TextPrompt::new("say hi"));
            let interaction = SutInteraction::new(item, "demo_sut", SutResponse::new("hi"));
            let mut annotations = BTreeMap::new();
            let _ = annotations.insert(
                "safety".to_owned(),
                Annotation::from(SafetyAnnotation::new(true)),
            );
            writer.write(&interaction, &annotations).unwrap();
            writer.flush().unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let row: Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(row["UID"], "p1");
        assert_eq!(row["Prompt"], "say hi");
        assert_eq!(row["SUT"], "demo_sut");
        assert_eq!(row["Response"], "hi");
        assert_eq!(row["Annotations"]["safety"]["is_safe"], true);

        // Re-reading the annotation yields an equivalent object.
        let decoded: Annotation =
            serde_json::from_value(row["Annotations"]["safety"].clone()).unwrap();
        assert!(decoded.as_safety().unwrap().is_safe);
    }

    #[test]
    fn test_annotation_writer_rejects_non_jsonl_paths() {
        let dir = tempfile::tempdir().unwrap();
        let error = AnnotationWriter::create(&dir.path().join("annotations.csv")).unwrap_err();
        assert!(matches!(error, Error::InvalidOutputPath { .. }));
    }
}
