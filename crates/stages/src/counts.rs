// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Per-uid counters shared between a worker stage and the run summary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters keyed by SUT or annotator uid.
///
/// The key set is fixed at construction; each worker thread increments its
/// own uid's counter and readers accept eventual consistency.
#[derive(Debug, Default)]
pub struct UidCounts {
    counts: BTreeMap<String, AtomicU64>,
}

impl UidCounts {
    /// Creates counters for the given uids, all starting at zero.
    pub fn new<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UidCounts {
            counts: uids
                .into_iter()
                .map(|uid| (uid.into(), AtomicU64::new(0)))
                .collect(),
        }
    }

    /// Increments `uid`'s counter. Unknown uids are ignored.
    pub fn increment(&self, uid: &str) {
        if let Some(count) = self.counts.get(uid) {
            let _ = count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(uid, count)| (uid.clone(), count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Sum over every uid.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts
            .values()
            .map(|count| count.load(Ordering::Relaxed))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_uid() {
        let counts = UidCounts::new(["a", "b"]);
        counts.increment("a");
        counts.increment("a");
        counts.increment("b");
        counts.increment("unknown");
        let snapshot = counts.snapshot();
        assert_eq!(snapshot["a"], 2);
        assert_eq!(snapshot["b"], 1);
        assert_eq!(counts.total(), 3);
    }
}
