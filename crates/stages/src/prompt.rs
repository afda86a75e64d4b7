// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The prompt side of the pipeline: items → SUT interactions.
//!
//! ```text
//! PromptSource → PromptSutAssigner → PromptSutWorkers(N) → PromptSink
//! ```
//!
//! The workers are where the engine spends its life: every (item, SUT) pair
//! costs one remote call, cached under the canonical request JSON and
//! retried without bound on failure — remote SUT APIs flake routinely and a
//! batch run would rather wait than lose the item. An operator who needs a
//! wall-clock cap supervises the process externally.

use crate::counts::UidCounts;
use safebench_data::{PromptDataset, PromptResponseWriter};
use safebench_engine::{BoxError, CachedWorker, Emitter, Error, Pipe, Sink, Source};
use safebench_model::{
    Capability, ModelOptions, Sut, SutInteraction, SutResponse, TestItem, TextPrompt,
    assert_sut_capabilities, canonical_json,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default worker thread count for the SUT stage.
pub const DEFAULT_WORKERS: usize = 8;

/// Default sleep between retries of a failed SUT call.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Feeds [`TestItem`]s from a prompts CSV into the pipeline.
pub struct PromptSource {
    dataset: PromptDataset,
}

impl PromptSource {
    /// Wraps an opened dataset.
    #[must_use]
    pub fn new(dataset: PromptDataset) -> Self {
        PromptSource { dataset }
    }
}

impl Source for PromptSource {
    type Output = TestItem;

    fn new_item_iterable(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<TestItem, BoxError>> + '_> {
        match self.dataset.iter() {
            Ok(rows) => Box::new(rows.map(|row| row.map_err(Into::into))),
            Err(error) => Box::new(std::iter::once(Err(error.into()))),
        }
    }
}

/// Fans every item out to every configured SUT. Pure fan-out, no I/O.
pub struct PromptSutAssigner {
    suts: BTreeMap<String, Arc<dyn Sut>>,
}

impl PromptSutAssigner {
    /// Creates the assigner over the run's SUT set.
    #[must_use]
    pub fn new(suts: BTreeMap<String, Arc<dyn Sut>>) -> Self {
        PromptSutAssigner { suts }
    }
}

impl Pipe for PromptSutAssigner {
    type Input = TestItem;
    type Output = (TestItem, String);

    fn handle_item(
        &self,
        item: TestItem,
        out: &Emitter<'_, (TestItem, String)>,
    ) -> Result<(), Error> {
        for sut_uid in self.suts.keys() {
            out.put((item.clone(), sut_uid.clone()));
        }
        Ok(())
    }
}

/// Calls SUTs on a worker pool, emitting one [`SutInteraction`] per
/// (item, SUT) pair.
///
/// Wrap it in a [`CachingPipe`] to get per-request caching; the cache key is
/// the canonical JSON of the translated request together with the SUT uid
/// and the run's options.
///
/// [`CachingPipe`]: safebench_engine::CachingPipe
pub struct PromptSutWorkers {
    suts: BTreeMap<String, Arc<dyn Sut>>,
    options: ModelOptions,
    workers: usize,
    retry_delay: Duration,
    counts: Arc<UidCounts>,
}

impl PromptSutWorkers {
    /// Creates the worker stage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the options are inconsistent, when
    /// any SUT lacks [`Capability::AcceptsTextPrompt`], or — if
    /// `top_logprobs` is requested — when any SUT lacks
    /// [`Capability::ProducesPerTokenLogProbabilities`].
    pub fn new(
        suts: BTreeMap<String, Arc<dyn Sut>>,
        options: ModelOptions,
        workers: Option<usize>,
    ) -> Result<Self, safebench_model::ConfigError> {
        options.validate()?;
        let mut required = vec![Capability::AcceptsTextPrompt];
        if options.top_logprobs.is_some() {
            required.push(Capability::ProducesPerTokenLogProbabilities);
        }
        assert_sut_capabilities(suts.values().map(|sut| sut.as_ref()), &required)?;

        let counts = Arc::new(UidCounts::new(suts.keys().cloned()));
        Ok(PromptSutWorkers {
            suts,
            options,
            workers: workers.unwrap_or(DEFAULT_WORKERS),
            retry_delay: DEFAULT_RETRY_DELAY,
            counts,
        })
    }

    /// Overrides the sleep between SUT retries.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Shared handle to the per-SUT response counters.
    #[must_use]
    pub fn response_counts(&self) -> Arc<UidCounts> {
        self.counts.clone()
    }

    fn sut(&self, uid: &str) -> Result<&dyn Sut, Error> {
        self.suts
            .get(uid)
            .map(Arc::as_ref)
            .ok_or_else(|| Error::message(format!("unknown sut uid: {uid}")))
    }

    fn call_sut(&self, prompt: &TextPrompt, uid: &str, sut: &dyn Sut) -> Result<SutResponse, Error> {
        let request = sut
            .translate_text_prompt(prompt, &self.options)
            .map_err(Error::handler)?;
        let mut tries: u64 = 0;
        let raw = loop {
            tries += 1;
            match sut.evaluate(&request) {
                Ok(raw) => break raw,
                Err(error) => {
                    tracing::warn!(sut = uid, tries, %error, "exception calling sut; retrying");
                    std::thread::sleep(self.retry_delay);
                }
            }
        };
        let response = sut
            .translate_response(&request, &raw)
            .map_err(Error::handler)?;
        self.counts.increment(uid);
        Ok(response)
    }
}

impl CachedWorker for PromptSutWorkers {
    type Input = (TestItem, String);
    type Output = SutInteraction;

    fn thread_count(&self) -> usize {
        self.workers
    }

    fn cache_key(&self, (item, sut_uid): &(TestItem, String)) -> Result<String, Error> {
        let sut = self.sut(sut_uid)?;
        let request = sut
            .translate_text_prompt(&item.prompt, &self.options)
            .map_err(Error::handler)?;
        let key = serde_json::json!({
            "options": serde_json::to_value(&self.options)?,
            "request": request.0,
            "sut": sut_uid,
        });
        Ok(canonical_json(&key))
    }

    fn handle_uncached_item(
        &self,
        (item, sut_uid): (TestItem, String),
    ) -> Result<Option<SutInteraction>, Error> {
        let sut = self.sut(&sut_uid)?;
        let response = self.call_sut(&item.prompt, &sut_uid, sut)?;
        Ok(Some(SutInteraction::new(item, sut_uid, response)))
    }
}

/// Writes interactions to the prompt-response CSV.
pub struct PromptSink {
    path: PathBuf,
    writer: Option<PromptResponseWriter>,
}

impl PromptSink {
    /// Creates a sink that will write to `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        PromptSink {
            path: path.to_path_buf(),
            writer: None,
        }
    }
}

impl Sink for PromptSink {
    type Input = SutInteraction;

    fn open(&mut self) -> Result<(), Error> {
        self.writer = Some(PromptResponseWriter::create(&self.path).map_err(Error::handler)?);
        Ok(())
    }

    fn handle_item(&mut self, item: SutInteraction) -> Result<(), Error> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::message("output writer is not open"))?;
        writer.write(&item).map_err(Error::handler)
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(Error::handler)?;
        }
        Ok(())
    }
}
