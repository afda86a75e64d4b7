// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! The annotation side of the pipeline: interactions → annotated rows.
//!
//! ```text
//! AnnotatorAssigner → AnnotatorWorkers(N) [→ EnsembleVoter] → AnnotatorSink
//! ```
//!
//! An annotator failure is logged and swallowed: the interaction simply
//! never gets that annotator's entry, and the sink will hold its partial row
//! forever rather than emit an incomplete one. The sink's partial buffer
//! grows with in-flight interactions; slow annotators under high concurrency
//! make it large.

use crate::counts::UidCounts;
use safebench_data::{AnnotationWriter, PromptResponseDataset};
use safebench_engine::{BoxError, CachedWorker, Emitter, Error, Pipe, Sink, Source};
use safebench_model::{AnnotatedInteraction, Annotation, Annotator, SutInteraction, canonical_json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default worker thread count for the annotator stage.
pub const DEFAULT_WORKERS: usize = 8;

/// Feeds [`SutInteraction`]s from a prompt-response CSV into the pipeline,
/// for annotator-only runs.
pub struct AnnotatorSource {
    dataset: PromptResponseDataset,
}

impl AnnotatorSource {
    /// Wraps an opened dataset.
    #[must_use]
    pub fn new(dataset: PromptResponseDataset) -> Self {
        AnnotatorSource { dataset }
    }
}

impl Source for AnnotatorSource {
    type Output = SutInteraction;

    fn new_item_iterable(
        &mut self,
    ) -> Box<dyn Iterator<Item = Result<SutInteraction, BoxError>> + '_> {
        match self.dataset.iter() {
            Ok(rows) => Box::new(rows.map(|row| row.map_err(Into::into))),
            Err(error) => Box::new(std::iter::once(Err(error.into()))),
        }
    }
}

/// Fans every interaction out to every configured annotator.
pub struct AnnotatorAssigner {
    annotators: BTreeMap<String, Arc<dyn Annotator>>,
}

impl AnnotatorAssigner {
    /// Creates the assigner over the run's annotator set.
    #[must_use]
    pub fn new(annotators: BTreeMap<String, Arc<dyn Annotator>>) -> Self {
        AnnotatorAssigner { annotators }
    }
}

impl Pipe for AnnotatorAssigner {
    type Input = SutInteraction;
    type Output = (SutInteraction, String);

    fn handle_item(
        &self,
        item: SutInteraction,
        out: &Emitter<'_, (SutInteraction, String)>,
    ) -> Result<(), Error> {
        for annotator_uid in self.annotators.keys() {
            out.put((item.clone(), annotator_uid.clone()));
        }
        Ok(())
    }
}

/// Calls annotators on a worker pool, emitting one [`AnnotatedInteraction`]
/// per (interaction, annotator) pair.
///
/// Wrap it in a [`CachingPipe`]; the cache key is the canonical JSON of the
/// translated annotator request together with the annotator uid.
///
/// [`CachingPipe`]: safebench_engine::CachingPipe
pub struct AnnotatorWorkers {
    annotators: BTreeMap<String, Arc<dyn Annotator>>,
    workers: usize,
    counts: Arc<UidCounts>,
}

impl AnnotatorWorkers {
    /// Creates the worker stage.
    #[must_use]
    pub fn new(annotators: BTreeMap<String, Arc<dyn Annotator>>, workers: Option<usize>) -> Self {
        let counts = Arc::new(UidCounts::new(annotators.keys().cloned()));
        AnnotatorWorkers {
            annotators,
            workers: workers.unwrap_or(DEFAULT_WORKERS),
            counts,
        }
    }

    /// Shared handle to the per-annotator annotation counters.
    #[must_use]
    pub fn annotation_counts(&self) -> Arc<UidCounts> {
        self.counts.clone()
    }

    fn annotator(&self, uid: &str) -> Result<&dyn Annotator, Error> {
        self.annotators
            .get(uid)
            .map(Arc::as_ref)
            .ok_or_else(|| Error::message(format!("unknown annotator uid: {uid}")))
    }

    fn annotate(
        &self,
        interaction: &SutInteraction,
        uid: &str,
    ) -> Result<Annotation, Error> {
        let annotator = self.annotator(uid)?;
        let request = annotator
            .translate_request(&interaction.item, &interaction.response)
            .map_err(Error::handler)?;
        let raw = annotator.annotate(&request).map_err(Error::handler)?;
        annotator
            .translate_response(&request, &raw)
            .map_err(Error::handler)
    }
}

impl CachedWorker for AnnotatorWorkers {
    type Input = (SutInteraction, String);
    type Output = AnnotatedInteraction;

    fn thread_count(&self) -> usize {
        self.workers
    }

    fn cache_key(&self, (interaction, uid): &(SutInteraction, String)) -> Result<String, Error> {
        let annotator = self.annotator(uid)?;
        let request = annotator
            .translate_request(&interaction.item, &interaction.response)
            .map_err(Error::handler)?;
        let key = serde_json::json!({
            "annotator": uid,
            "request": request.0,
        });
        Ok(canonical_json(&key))
    }

    fn handle_uncached_item(
        &self,
        (interaction, uid): (SutInteraction, String),
    ) -> Result<Option<AnnotatedInteraction>, Error> {
        match self.annotate(&interaction, &uid) {
            Ok(annotation) => {
                self.counts.increment(&uid);
                Ok(Some(AnnotatedInteraction {
                    interaction,
                    annotator_uid: uid,
                    annotation,
                }))
            }
            Err(error) => {
                // The item keeps flowing; it just never gets this
                // annotator's entry.
                tracing::error!(annotator = %uid, %error, "failure annotating interaction");
                Ok(None)
            }
        }
    }
}

struct PendingRow {
    interaction: SutInteraction,
    annotations: BTreeMap<String, Annotation>,
}

/// Collects per-interaction annotations and writes a JSONL row once every
/// expected annotator (plus the ensemble slot, when configured) is present.
pub struct AnnotatorSink {
    path: PathBuf,
    expected: BTreeSet<String>,
    writer: Option<AnnotationWriter>,
    pending: HashMap<(String, String), PendingRow>,
}

impl AnnotatorSink {
    /// Creates a sink expecting one annotation per uid in `annotator_uids`,
    /// plus an `"ensemble"` entry when `with_ensemble` is set.
    pub fn new<I, S>(path: &Path, annotator_uids: I, with_ensemble: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut expected: BTreeSet<String> =
            annotator_uids.into_iter().map(Into::into).collect();
        if with_ensemble {
            let _ = expected.insert(crate::ensemble::ENSEMBLE_UID.to_owned());
        }
        AnnotatorSink {
            path: path.to_path_buf(),
            expected,
            writer: None,
            pending: HashMap::new(),
        }
    }

    /// Interactions currently buffered with an incomplete annotation set.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Sink for AnnotatorSink {
    type Input = AnnotatedInteraction;

    fn open(&mut self) -> Result<(), Error> {
        self.writer = Some(AnnotationWriter::create(&self.path).map_err(Error::handler)?);
        Ok(())
    }

    fn handle_item(&mut self, item: AnnotatedInteraction) -> Result<(), Error> {
        let key = item.interaction.key();
        let row = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| PendingRow {
                interaction: item.interaction.clone(),
                annotations: BTreeMap::new(),
            });
        let _ = row.annotations.insert(item.annotator_uid, item.annotation);

        let complete = self
            .expected
            .iter()
            .all(|uid| row.annotations.contains_key(uid));
        if complete {
            let row = self
                .pending
                .remove(&key)
                .ok_or_else(|| Error::message("pending row vanished"))?;
            let writer = self
                .writer
                .as_mut()
                .ok_or_else(|| Error::message("output writer is not open"))?;
            writer
                .write(&row.interaction, &row.annotations)
                .map_err(Error::handler)?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if !self.pending.is_empty() {
            tracing::warn!(
                unfinished = self.pending.len(),
                "interactions never completed their annotation set"
            );
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(Error::handler)?;
        }
        Ok(())
    }
}
