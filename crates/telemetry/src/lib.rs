// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Run-level telemetry: the append-only run journal, optional push-gateway
//! metrics and progress trackers.
//!
//! Everything in this crate is observational. Journal write failures and
//! metric push failures are logged and swallowed; they never abort a run.

pub mod error;
pub mod journal;
pub mod monitoring;
pub mod tracker;

pub use error::Error;
pub use journal::{Caller, RunJournal};
pub use monitoring::Monitoring;
pub use tracker::{JsonRunTracker, NullRunTracker, ProgressBarRunTracker, RunTracker};
