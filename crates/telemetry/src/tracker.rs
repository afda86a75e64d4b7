// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Run progress trackers.
//!
//! A tracker receives the expected total before the pipeline starts and
//! completion counts while it runs. Updates are throttled (default one per
//! second) to keep output noise down; `done` always reports the final state.

use parking_lot::Mutex;
use std::io::Write;
use std::time::{Duration, Instant};

/// Default minimum interval between visible updates.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(1);

/// Receives progress for one run.
pub trait RunTracker: Send + Sync {
    /// Called once before the pipeline starts with the expected item count.
    fn start(&self, total_items: u64);
    /// Called as items finish. Implementations may throttle output.
    fn update(&self, finished_items: u64);
    /// Called once after the run completes.
    fn done(&self);
}

/// A tracker that reports nothing.
#[derive(Debug, Default)]
pub struct NullRunTracker;

impl RunTracker for NullRunTracker {
    fn start(&self, _total_items: u64) {}
    fn update(&self, _finished_items: u64) {}
    fn done(&self) {}
}

struct JsonState {
    out: Box<dyn Write + Send>,
    total: u64,
    last_update: Option<Instant>,
}

/// A tracker that emits machine-readable `{"progress": fraction}` lines.
pub struct JsonRunTracker {
    state: Mutex<JsonState>,
    period: Duration,
}

impl JsonRunTracker {
    /// Creates a tracker writing to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stderr()))
    }

    /// Creates a tracker writing to the given sink.
    #[must_use]
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        JsonRunTracker {
            state: Mutex::new(JsonState {
                out,
                total: 0,
                last_update: None,
            }),
            period: DEFAULT_UPDATE_PERIOD,
        }
    }

    /// Overrides the update throttle period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    fn emit(state: &mut JsonState, finished_items: u64) {
        let progress = if state.total == 0 {
            1.0
        } else {
            finished_items as f64 / state.total as f64
        };
        let line = serde_json::json!({ "progress": progress });
        if let Err(error) = writeln!(state.out, "{line}") {
            tracing::warn!(%error, "failed to write progress line");
        }
        state.last_update = Some(Instant::now());
    }
}

impl Default for JsonRunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker for JsonRunTracker {
    fn start(&self, total_items: u64) {
        let mut state = self.state.lock();
        state.total = total_items;
        Self::emit(&mut state, 0);
    }

    fn update(&self, finished_items: u64) {
        let mut state = self.state.lock();
        let due = match state.last_update {
            Some(last) => last.elapsed() >= self.period,
            None => true,
        };
        if due {
            Self::emit(&mut state, finished_items);
        }
    }

    fn done(&self) {
        let mut state = self.state.lock();
        let total = state.total;
        Self::emit(&mut state, total);
    }
}

/// A tracker that renders an interactive progress bar.
pub struct ProgressBarRunTracker {
    bar: Mutex<Option<indicatif::ProgressBar>>,
}

impl ProgressBarRunTracker {
    /// Creates an idle tracker; the bar appears on `start`.
    #[must_use]
    pub fn new() -> Self {
        ProgressBarRunTracker {
            bar: Mutex::new(None),
        }
    }
}

impl Default for ProgressBarRunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker for ProgressBarRunTracker {
    fn start(&self, total_items: u64) {
        let bar = indicatif::ProgressBar::new(total_items);
        *self.bar.lock() = Some(bar);
    }

    fn update(&self, finished_items: u64) {
        if let Some(bar) = self.bar.lock().as_ref() {
            bar.set_position(finished_items);
        }
    }

    fn done(&self) {
        if let Some(bar) = self.bar.lock().as_ref() {
            bar.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn progress_lines(buffer: &SharedBuffer) -> Vec<f64> {
        let raw = buffer.0.lock().clone();
        String::from_utf8(raw)
            .unwrap()
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["progress"].as_f64().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_json_tracker_reports_start_and_done() {
        let buffer = SharedBuffer::default();
        let tracker = JsonRunTracker::with_writer(Box::new(buffer.clone()));
        tracker.start(4);
        tracker.done();

        let lines = progress_lines(&buffer);
        assert_eq!(lines, vec![0.0, 1.0]);
    }

    #[test]
    fn test_json_tracker_throttles_updates() {
        let buffer = SharedBuffer::default();
        let tracker = JsonRunTracker::with_writer(Box::new(buffer.clone()))
            .with_period(Duration::from_secs(3600));
        tracker.start(10);
        for i in 1..=9 {
            tracker.update(i);
        }
        tracker.done();

        // start + done only; every intermediate update fell in the throttle
        // window opened by start.
        assert_eq!(progress_lines(&buffer).len(), 2);
    }

    #[test]
    fn test_json_tracker_unthrottled_reports_every_update() {
        let buffer = SharedBuffer::default();
        let tracker =
            JsonRunTracker::with_writer(Box::new(buffer.clone())).with_period(Duration::ZERO);
        tracker.start(2);
        tracker.update(1);
        tracker.update(2);
        tracker.done();

        assert_eq!(progress_lines(&buffer), vec![0.0, 0.5, 1.0, 1.0]);
    }
}
