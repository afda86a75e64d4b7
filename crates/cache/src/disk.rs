// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed persistent cache with a size ceiling.
//!
//! One database file per cache directory. Every `set` is a single upsert
//! statement, so readers on other connections or threads see either the old
//! value or the new one, never a torn write. When the stored bytes exceed the
//! configured ceiling, the least-recently-accessed entries are evicted until
//! the cache fits again.

use crate::error::Error;
use crate::{Cache, CacheStats, Counters};
use parking_lot::Mutex;
use prometheus::{IntCounterVec, IntGaugeVec};
use rusqlite::{Connection, OptionalExtension, params};
use safebench_telemetry::Monitoring;
use std::path::{Path, PathBuf};

/// Default size ceiling: 20 GiB, matching the production deployments this
/// engine was built for.
pub const DEFAULT_SIZE_LIMIT: u64 = 20 * (1 << 30);

struct CacheMetrics {
    gets: IntCounterVec,
    puts: IntCounterVec,
    hits: IntCounterVec,
    size: IntGaugeVec,
}

impl CacheMetrics {
    fn new() -> Self {
        let monitoring = Monitoring::global();
        CacheMetrics {
            gets: monitoring.counter("mm_cache_gets", "Cache gets", &["name"]),
            puts: monitoring.counter("mm_cache_puts", "Cache puts", &["name"]),
            hits: monitoring.counter("mm_cache_hits", "Cache hits", &["name"]),
            size: monitoring.gauge("mm_cache_size", "Cache size", &["name"]),
        }
    }
}

/// Persistent key→blob cache backed by SQLite.
pub struct DiskCache {
    name: String,
    path: PathBuf,
    conn: Mutex<Connection>,
    size_limit: u64,
    counters: Counters,
    metrics: CacheMetrics,
}

impl DiskCache {
    /// Opens (or creates) the cache stored under `dir` with the default size
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(dir: &Path) -> Result<Self, Error> {
        Self::with_size_limit(dir, DEFAULT_SIZE_LIMIT)
    }

    /// Opens (or creates) the cache stored under `dir` with an explicit size
    /// ceiling in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn with_size_limit(dir: &Path, size_limit: u64) -> Result<Self, Error> {
        std::fs::create_dir_all(dir)?;
        let conn = Connection::open(dir.join("cache.db"))?;
        // WAL keeps readers unblocked while a worker writes.
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                size INTEGER NOT NULL,
                accessed_at INTEGER NOT NULL
            );",
        )?;

        let name = cache_name(dir);
        Ok(DiskCache {
            name,
            path: dir.to_path_buf(),
            conn: Mutex::new(conn),
            size_limit,
            counters: Counters::default(),
            metrics: CacheMetrics::new(),
        })
    }

    /// The directory this cache lives in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn enforce_size_limit(conn: &Connection, size_limit: u64) -> Result<(), Error> {
        loop {
            let total: i64 =
                conn.query_row("SELECT COALESCE(SUM(size), 0) FROM entries", [], |row| {
                    row.get(0)
                })?;
            if total <= 0 || (total as u64) <= size_limit {
                return Ok(());
            }
            let evicted = conn.execute(
                "DELETE FROM entries WHERE key = (
                    SELECT key FROM entries ORDER BY accessed_at ASC LIMIT 1
                )",
                [],
            )?;
            if evicted == 0 {
                return Ok(());
            }
            tracing::debug!("evicted least-recently-accessed cache entry");
        }
    }
}

fn cache_name(dir: &Path) -> String {
    let raw = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "disk".to_owned());
    raw.strip_suffix("_cache").unwrap_or(&raw).to_owned()
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.metrics.gets.with_label_values(&[&self.name]).inc();
        let conn = self.conn.lock();
        let value: Option<Vec<u8>> = conn
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        if value.is_some() {
            let _ = conn.execute(
                "UPDATE entries SET accessed_at = ?1 WHERE key = ?2",
                params![now_micros(), key],
            )?;
            self.metrics.hits.with_label_values(&[&self.name]).inc();
        }
        self.counters.record_get(value.is_some());
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        {
            let conn = self.conn.lock();
            let _ = conn.execute(
                "INSERT INTO entries (key, value, size, accessed_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    size = excluded.size,
                    accessed_at = excluded.accessed_at",
                params![key, value, value.len() as i64, now_micros()],
            )?;
            Self::enforce_size_limit(&conn, self.size_limit)?;
        }
        self.counters.record_put();
        self.metrics.puts.with_label_values(&[&self.name]).inc();
        self.metrics
            .size
            .with_label_values(&[&self.name])
            .set(self.entry_count() as i64);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool, Error> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn entry_count(&self) -> usize {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM entries", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count.max(0) as usize)
        .unwrap_or(0)
    }

    fn stats(&self) -> CacheStats {
        self.counters.stats(self.entry_count())
    }

    fn flush(&self) -> Result<(), Error> {
        let conn = self.conn.lock();
        // wal_checkpoint reports its outcome as a row; run it as a query.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_row| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_round_trip_and_persistence() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = DiskCache::open(dir.path()).unwrap();
            cache.set("k1", b"hello").unwrap();
            assert_eq!(cache.get("k1").unwrap().as_deref(), Some(&b"hello"[..]));
        }
        // A fresh handle over the same directory sees the stored value.
        let cache = DiskCache::open(dir.path()).unwrap();
        assert_eq!(cache.get("k1").unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_overwrite_is_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        cache.set("k", b"old").unwrap();
        cache.set("k", b"new").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some(&b"new"[..]));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_contains_without_touching_value() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::open(dir.path()).unwrap();
        assert!(!cache.contains("k").unwrap());
        cache.set("k", b"v").unwrap();
        assert!(cache.contains("k").unwrap());
    }

    #[test]
    fn test_eviction_under_size_pressure() {
        let dir = tempfile::tempdir().unwrap();
        // Enough room for roughly two of the three values below.
        let cache = DiskCache::with_size_limit(dir.path(), 2048).unwrap();
        cache.set("oldest", &[0u8; 900]).unwrap();
        cache.set("middle", &[1u8; 900]).unwrap();
        // Touch "oldest" so "middle" becomes the eviction candidate.
        let _ = cache.get("oldest").unwrap();
        cache.set("newest", &[2u8; 900]).unwrap();

        assert!(cache.get("newest").unwrap().is_some());
        // Something was evicted to fit under the ceiling.
        assert!(cache.entry_count() < 3);
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(DiskCache::open(dir.path()).unwrap());
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let cache = cache.clone();
                let _ = scope.spawn(move || {
                    for i in 0..20 {
                        let key = format!("w{worker}-i{i}");
                        cache.set(&key, key.as_bytes()).unwrap();
                        let value = cache.get(&key).unwrap().unwrap();
                        assert_eq!(value, key.as_bytes());
                    }
                });
            }
        });
        assert_eq!(cache.entry_count(), 80);
    }

    #[test]
    fn test_name_strips_cache_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let sut_dir = dir.path().join("sut_cache");
        let cache = DiskCache::open(&sut_dir).unwrap();
        assert_eq!(cache.name(), "sut");
    }
}
