// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! A pipe that caches its results.
//!
//! [`CachingPipe`] wraps a [`CachedWorker`] and implements [`Pipe`] around
//! it: before computing, it derives a cache key for the item and returns the
//! decoded cached value on a hit; on a miss it computes, stores the encoded
//! result, and emits it. Results are encoded as JSON.
//!
//! Two workers may race on the same key; the cache resolves that
//! last-writer-wins and the double compute is accepted. Cache I/O or codec
//! failures degrade to a miss — they are logged and never fail the item.

use crate::error::Error;
use crate::pipe::{Emitter, Pipe};
use safebench_cache::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// The computation wrapped by a [`CachingPipe`].
pub trait CachedWorker: Send + Sync + 'static {
    /// The item type consumed from upstream.
    type Input: Send + 'static;
    /// The item type produced downstream; must survive a JSON round trip.
    type Output: Send + Serialize + DeserializeOwned + 'static;

    /// Stage name used for worker threads and logs.
    fn name(&self) -> String {
        crate::short_type_name::<Self>().to_owned()
    }

    /// Number of worker threads for this stage.
    fn thread_count(&self) -> usize {
        1
    }

    /// Capacity of this stage's output queue; zero means unbounded.
    fn queue_capacity(&self) -> usize {
        0
    }

    /// Derives the cache key for an item.
    ///
    /// # Errors
    ///
    /// An error drops the item without touching the cache.
    fn cache_key(&self, item: &Self::Input) -> Result<String, Error>;

    /// Does the actual work for an item that missed the cache.
    ///
    /// Returning `Ok(None)` drops the item silently (nothing is cached and
    /// nothing is emitted).
    ///
    /// # Errors
    ///
    /// An error drops the item; nothing is cached.
    fn handle_uncached_item(&self, item: Self::Input) -> Result<Option<Self::Output>, Error>;
}

/// A [`Pipe`] that consults a shared cache around a [`CachedWorker`].
pub struct CachingPipe<W> {
    worker: W,
    cache: Arc<dyn Cache>,
}

impl<W: CachedWorker> CachingPipe<W> {
    /// Wraps `worker` with `cache`.
    pub fn new(worker: W, cache: Arc<dyn Cache>) -> Self {
        CachingPipe { worker, cache }
    }

    /// The wrapped worker.
    pub fn worker(&self) -> &W {
        &self.worker
    }
}

impl<W: CachedWorker> Pipe for CachingPipe<W> {
    type Input = W::Input;
    type Output = W::Output;

    fn name(&self) -> String {
        self.worker.name()
    }

    fn thread_count(&self) -> usize {
        self.worker.thread_count()
    }

    fn queue_capacity(&self) -> usize {
        self.worker.queue_capacity()
    }

    fn handle_item(&self, item: Self::Input, out: &Emitter<'_, Self::Output>) -> Result<(), Error> {
        let key = self.worker.cache_key(&item)?;

        match self.cache.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<W::Output>(&bytes) {
                Ok(value) => {
                    out.put(value);
                    return Ok(());
                }
                Err(error) => {
                    tracing::warn!(cache = %self.cache.name(), %error, "discarding undecodable cache entry");
                }
            },
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(cache = %self.cache.name(), %error, "cache read failed; treating as miss");
            }
        }

        if let Some(value) = self.worker.handle_uncached_item(item)? {
            match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    if let Err(error) = self.cache.set(&key, &bytes) {
                        tracing::warn!(cache = %self.cache.name(), %error, "cache write failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(cache = %self.cache.name(), %error, "failed to encode result for cache");
                }
            }
            out.put(value);
        }
        Ok(())
    }

    fn on_close(&self) {
        if let Err(error) = self.cache.flush() {
            tracing::warn!(cache = %self.cache.name(), %error, "cache flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use crate::sink::Sink;
    use crate::source::Source;
    use parking_lot::Mutex;
    use safebench_cache::MemoryCache;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Numbers(Vec<i64>);

    impl Source for Numbers {
        type Output = i64;

        fn new_item_iterable(
            &mut self,
        ) -> Box<dyn Iterator<Item = Result<i64, crate::BoxError>> + '_> {
            Box::new(self.0.clone().into_iter().map(Ok))
        }
    }

    struct Doubler {
        computed: Arc<AtomicU64>,
    }

    impl CachedWorker for Doubler {
        type Input = i64;
        type Output = i64;

        fn cache_key(&self, item: &i64) -> Result<String, Error> {
            Ok(format!("double:{item}"))
        }

        fn handle_uncached_item(&self, item: i64) -> Result<Option<i64>, Error> {
            let _ = self.computed.fetch_add(1, Ordering::SeqCst);
            Ok(Some(item * 2))
        }
    }

    struct Collect(Arc<Mutex<Vec<i64>>>);

    impl Sink for Collect {
        type Input = i64;

        fn handle_item(&mut self, item: i64) -> Result<(), Error> {
            self.0.lock().push(item);
            Ok(())
        }
    }

    fn run_once(cache: Arc<dyn Cache>, computed: Arc<AtomicU64>) -> Vec<i64> {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::builder(Numbers(vec![1, 2, 3]))
            .pipe(CachingPipe::new(Doubler { computed }, cache))
            .sink(Collect(collected.clone()));
        pipeline.run();
        let mut result = collected.lock().clone();
        result.sort_unstable();
        result
    }

    #[test]
    fn test_second_run_is_served_from_cache() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let computed = Arc::new(AtomicU64::new(0));

        assert_eq!(run_once(cache.clone(), computed.clone()), vec![2, 4, 6]);
        assert_eq!(computed.load(Ordering::SeqCst), 3);

        assert_eq!(run_once(cache.clone(), computed.clone()), vec![2, 4, 6]);
        // Every item hit the cache; no new computation happened.
        assert_eq!(computed.load(Ordering::SeqCst), 3);
        assert_eq!(cache.entry_count(), 3);
    }

    struct FailingWorker;

    impl CachedWorker for FailingWorker {
        type Input = i64;
        type Output = i64;

        fn cache_key(&self, item: &i64) -> Result<String, Error> {
            Ok(item.to_string())
        }

        fn handle_uncached_item(&self, _item: i64) -> Result<Option<i64>, Error> {
            Err(Error::message("boom"))
        }
    }

    #[test]
    fn test_failed_items_cache_nothing() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::builder(Numbers(vec![1, 2]))
            .pipe(CachingPipe::new(FailingWorker, cache.clone()))
            .sink(Collect(collected.clone()));
        pipeline.run();

        assert!(collected.lock().is_empty());
        assert_eq!(cache.entry_count(), 0);
    }
}
