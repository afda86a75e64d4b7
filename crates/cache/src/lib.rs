// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Persistent key→blob caches shared by pipeline worker stages.
//!
//! Three implementations cover the spectrum: [`NullCache`] (always miss),
//! [`MemoryCache`] (per-process hash map) and [`DiskCache`] (SQLite-backed,
//! size-capped, survives across runs). Keys are canonical request strings,
//! values opaque serialized records. All implementations are safe under
//! concurrent access; a reader never observes a partially written value.
//!
//! Hit/miss counters are observational only.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod disk;
pub mod error;

pub use disk::DiskCache;
pub use error::Error;

/// Observational counters for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups performed.
    pub gets: u64,
    /// Values stored.
    pub puts: u64,
    /// Lookups that found a value.
    pub hits: u64,
    /// Entries currently stored.
    pub entries: usize,
}

/// A concurrent-safe key→blob map.
///
/// Writers must be atomic: a `get` racing a `set` on the same key sees either
/// the full previous value, the full new value, or a miss — never a torn
/// write. Racing writers resolve last-writer-wins.
pub trait Cache: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    /// Looks up `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed; callers treat it as a miss.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed; the entry may not be stored.
    fn set(&self, key: &str, value: &[u8]) -> Result<(), Error>;

    /// Whether `key` currently has a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed.
    fn contains(&self, key: &str) -> Result<bool, Error> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of entries currently stored.
    fn entry_count(&self) -> usize;

    /// Current observational counters.
    fn stats(&self) -> CacheStats;

    /// Flushes pending state to the backend and releases transient
    /// resources. Called when the owning stage shuts down.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed to flush.
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    gets: AtomicU64,
    puts: AtomicU64,
    hits: AtomicU64,
}

impl Counters {
    pub(crate) fn record_get(&self, hit: bool) {
        let _ = self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            let _ = self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_put(&self) {
        let _ = self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self, entries: usize) -> CacheStats {
        CacheStats {
            gets: self.gets.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// A cache that stores nothing and never hits.
#[derive(Debug, Default)]
pub struct NullCache {
    counters: Counters,
}

impl NullCache {
    /// Creates a null cache.
    #[must_use]
    pub fn new() -> Self {
        NullCache::default()
    }
}

impl Cache for NullCache {
    fn name(&self) -> &str {
        "null"
    }

    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.counters.record_get(false);
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn entry_count(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        self.counters.stats(0)
    }
}

/// A cache that holds values in process memory only.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    counters: Counters,
}

impl MemoryCache {
    /// Creates an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        MemoryCache::default()
    }
}

impl Cache for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let value = self.entries.read().get(key).cloned();
        self.counters.record_get(value.is_some());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        let _ = self.entries.write().insert(key.to_owned(), value.to_vec());
        self.counters.record_put();
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, Error> {
        Ok(self.entries.read().contains_key(key))
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    fn stats(&self) -> CacheStats {
        self.counters.stats(self.entry_count())
    }
}
