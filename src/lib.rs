// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! SafeBench is a staged, multi-threaded benchmark-execution engine for
//! language-model safety evaluation.
//!
//! Prompts flow from a source through one or more systems-under-test (SUTs)
//! and then through one or more annotators, with each stage running its own
//! pool of worker threads connected by bounded queues. Remote calls are
//! deduplicated through persistent on-disk caches, individual item failures
//! never abort a run, and every run appends a structured JSON-lines journal.
//!
//! The workspace is split into focused crates, re-exported here:
//!
//! - [`channel`] — the bounded work queue connecting stages.
//! - [`cache`] — null / in-memory / on-disk key→blob caches.
//! - [`engine`] — the generic `Source` / `Pipe` / `Sink` pipeline framework.
//! - [`model`] — prompts, items, SUT and annotator contracts, retry and
//!   readiness policies.
//! - [`data`] — CSV/JSONL schemas, datasets and writers.
//! - [`stages`] — the concrete prompt and annotator pipeline stages plus the
//!   standalone pipeline runner.
//! - [`telemetry`] — the run journal, push-gateway metrics and run trackers.
//! - [`runner`] — the benchmark runner: assembly, ready checks, scoring and
//!   journaling of a full benchmark run.

pub use safebench_cache as cache;
pub use safebench_channel as channel;
pub use safebench_data as data;
pub use safebench_engine as engine;
pub use safebench_model as model;
pub use safebench_runner as runner;
pub use safebench_stages as stages;
pub use safebench_telemetry as telemetry;
