// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The run journal: a thread-safe, append-only JSON-lines event log.
//!
//! Every entry is one JSON object with a `timestamp` (ISO-8601 UTC),
//! a `message`, the `class` and `method` of the call site, and any number of
//! event-specific fields. Each write serialises and flushes the full line
//! under a mutex so concurrent writers always produce well-formed JSON-lines.
//!
//! File-backed journals are zstd-compressed
//! (`journals/journal-<run_id>.jsonl.zst`). An in-memory variant exists for
//! tests and a null variant for callers that do not want a journal at all.

use crate::error::Error;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use zstd::stream::Encoder;

/// The call site recorded on a journal entry.
///
/// Call sites pass this explicitly; there is no stack inspection.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    /// The type writing the entry.
    pub class: &'static str,
    /// The method writing the entry.
    pub method: &'static str,
}

impl Caller {
    /// Creates a caller tag.
    #[must_use]
    pub const fn new(class: &'static str, method: &'static str) -> Self {
        Caller { class, method }
    }
}

enum JournalSink {
    Zstd(Encoder<'static, BufWriter<File>>),
    Memory(Arc<Mutex<Vec<u8>>>),
    Null,
}

impl JournalSink {
    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        match self {
            JournalSink::Zstd(encoder) => {
                encoder.write_all(line)?;
                encoder.write_all(b"\n")?;
                encoder.flush()
            }
            JournalSink::Memory(buffer) => {
                let mut buffer = buffer.lock();
                buffer.extend_from_slice(line);
                buffer.push(b'\n');
                Ok(())
            }
            JournalSink::Null => Ok(()),
        }
    }

    fn finish(self) -> std::io::Result<()> {
        match self {
            JournalSink::Zstd(encoder) => {
                let mut writer = encoder.finish()?;
                writer.flush()
            }
            JournalSink::Memory(_) | JournalSink::Null => Ok(()),
        }
    }
}

/// Thread-safe append-only JSON-lines event log for one run.
pub struct RunJournal {
    sink: Mutex<Option<JournalSink>>,
}

impl RunJournal {
    /// Opens a zstd-compressed journal file at `path`, creating parent
    /// directories as needed, and records the `starting journal` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn new(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let encoder = Encoder::new(BufWriter::new(file), 0)?;
        let journal = RunJournal {
            sink: Mutex::new(Some(JournalSink::Zstd(encoder))),
        };
        journal.raw_entry(
            "starting journal",
            Caller::new("RunJournal", "new"),
            Value::Null,
        );
        Ok(journal)
    }

    /// Creates a journal that records entries into a shared in-memory buffer.
    ///
    /// Returns the journal and a handle to the buffer of uncompressed
    /// JSON-lines. Used by tests.
    #[must_use]
    pub fn in_memory() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let journal = RunJournal {
            sink: Mutex::new(Some(JournalSink::Memory(buffer.clone()))),
        };
        journal.raw_entry(
            "starting journal",
            Caller::new("RunJournal", "in_memory"),
            Value::Null,
        );
        (journal, buffer)
    }

    /// Creates a journal that discards every entry.
    #[must_use]
    pub fn null() -> Self {
        RunJournal {
            sink: Mutex::new(Some(JournalSink::Null)),
        }
    }

    /// Appends one entry.
    ///
    /// `fields` must be `Value::Null` or a JSON object; its members are
    /// merged into the entry. Write failures are logged and swallowed.
    pub fn raw_entry(&self, message: &str, caller: Caller, fields: Value) {
        let mut entry = Map::new();
        let _ = entry.insert(
            "timestamp".to_owned(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let _ = entry.insert("message".to_owned(), Value::String(message.to_owned()));
        let _ = entry.insert("class".to_owned(), Value::String(caller.class.to_owned()));
        let _ = entry.insert("method".to_owned(), Value::String(caller.method.to_owned()));
        match fields {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    let _ = entry.insert(key, value);
                }
            }
            other => {
                let _ = entry.insert("fields".to_owned(), other);
            }
        }

        let line = match serde_json::to_vec(&Value::Object(entry)) {
            Ok(line) => line,
            Err(error) => {
                tracing::error!(%error, message, "failed to serialise journal entry");
                return;
            }
        };

        let mut sink = self.sink.lock();
        match sink.as_mut() {
            Some(sink) => {
                if let Err(error) = sink.write_line(&line) {
                    tracing::error!(%error, message, "failed to write journal entry");
                }
            }
            None => {
                tracing::warn!(message, "journal entry after close; dropping");
            }
        }
    }

    /// Finishes the compressed stream and releases the file handle.
    ///
    /// Entries written after `close` are dropped with a warning.
    pub fn close(&self) {
        let sink = self.sink.lock().take();
        if let Some(sink) = sink {
            if let Err(error) = sink.finish() {
                tracing::error!(%error, "failed to finish journal stream");
            }
        }
    }
}

impl Drop for RunJournal {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lines(buffer: &Arc<Mutex<Vec<u8>>>) -> Vec<Value> {
        let raw = buffer.lock().clone();
        String::from_utf8(raw)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_entries_are_json_lines_with_required_fields() {
        let (journal, buffer) = RunJournal::in_memory();
        journal.raw_entry(
            "starting run",
            Caller::new("BenchmarkRunner", "run"),
            json!({"run_id": "run-1", "max_items": 10}),
        );

        let entries = lines(&buffer);
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert!(entry.get("timestamp").is_some());
            assert!(entry.get("message").is_some());
        }
        assert_eq!(entries[0]["message"], "starting journal");
        assert_eq!(entries[1]["message"], "starting run");
        assert_eq!(entries[1]["class"], "BenchmarkRunner");
        assert_eq!(entries[1]["method"], "run");
        assert_eq!(entries[1]["run_id"], "run-1");
        assert_eq!(entries[1]["max_items"], 10);
    }

    #[test]
    fn test_concurrent_writers_produce_well_formed_lines() {
        let (journal, buffer) = RunJournal::in_memory();
        let journal = Arc::new(journal);
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let journal = journal.clone();
                let _ = scope.spawn(move || {
                    for i in 0..50 {
                        journal.raw_entry(
                            "queuing item",
                            Caller::new("Worker", "handle_item"),
                            json!({"worker": worker, "item": i}),
                        );
                    }
                });
            }
        });

        let entries = lines(&buffer);
        assert_eq!(entries.len(), 1 + 8 * 50);
    }

    #[test]
    fn test_file_journal_round_trips_through_zstd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journals").join("journal-test.jsonl.zst");
        let journal = RunJournal::new(&path).unwrap();
        journal.raw_entry(
            "finished run",
            Caller::new("BenchmarkRunner", "run"),
            json!({"run_id": "run-2"}),
        );
        journal.close();

        let raw = std::fs::read(&path).unwrap();
        let decoded = zstd::stream::decode_all(raw.as_slice()).unwrap();
        let text = String::from_utf8(decoded).unwrap();
        let entries: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["message"], "finished run");
    }

    #[test]
    fn test_entries_after_close_are_dropped() {
        let (journal, buffer) = RunJournal::in_memory();
        journal.close();
        journal.raw_entry("late", Caller::new("Test", "test"), Value::Null);
        assert_eq!(lines(&buffer).len(), 1);
    }
}
