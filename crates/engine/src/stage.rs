// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Internal worker plumbing shared by the stage runtimes.

use crate::DEFAULT_POLL_TIMEOUT;
use crate::pipe::{Emitter, Pipe};
use crate::sink::Sink;
use crate::source::Source;
use safebench_channel::{RecvError, WorkQueue};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// Lets the done-predicate look at a stage's output queue without knowing its
/// item type.
pub(crate) trait QueueProbe: Send + Sync {
    fn queue_empty(&self) -> bool;
}

impl<T: Send + 'static> QueueProbe for WorkQueue<T> {
    fn queue_empty(&self) -> bool {
        self.is_empty()
    }
}

/// Stand-in probe for the sink, which has no output queue.
pub(crate) struct NoQueue;

impl QueueProbe for NoQueue {
    fn queue_empty(&self) -> bool {
        true
    }
}

/// Shared, observable state of one stage.
pub(crate) struct StageState {
    pub(crate) name: String,
    work_done: AtomicBool,
    completed: AtomicU64,
    queue: Arc<dyn QueueProbe>,
    upstream: Option<Arc<StageState>>,
}

impl StageState {
    pub(crate) fn new(
        name: String,
        queue: Arc<dyn QueueProbe>,
        upstream: Option<Arc<StageState>>,
    ) -> Self {
        StageState {
            name,
            work_done: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            queue,
            upstream,
        }
    }

    /// A stage is done when its own work is finished, its output queue is
    /// drained, and its upstream stage is done.
    pub(crate) fn done(&self) -> bool {
        if let Some(upstream) = &self.upstream {
            if !upstream.done() {
                return false;
            }
        }
        self.work_done.load(Ordering::Acquire) && self.queue.queue_empty()
    }

    pub(crate) fn mark_work_done(&self) {
        self.work_done.store(true, Ordering::Release);
    }

    pub(crate) fn add_completed(&self) {
        let _ = self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Start/join interface the pipeline drives each stage through.
pub(crate) trait StageRuntime: Send {
    fn start(&mut self);
    fn join(&mut self);
}

fn spawn_worker<F: FnOnce() + Send + 'static>(name: String, body: F) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name)
        .spawn(body)
        .expect("failed to spawn pipeline worker thread")
}

fn join_worker(stage: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        tracing::error!(stage, "pipeline worker thread panicked");
    }
}

pub(crate) struct SourceRuntime<S: Source> {
    pub(crate) source: Option<S>,
    pub(crate) queue: Arc<WorkQueue<S::Output>>,
    pub(crate) state: Arc<StageState>,
    pub(crate) handle: Option<JoinHandle<()>>,
}

impl<S: Source> StageRuntime for SourceRuntime<S> {
    fn start(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let queue = self.queue.clone();
        let state = self.state.clone();
        self.handle = Some(spawn_worker(format!("{}-run-1", state.name), move || {
            for result in source.new_item_iterable() {
                match result {
                    Ok(item) => queue.put(item),
                    Err(error) => {
                        tracing::warn!(stage = %state.name, %error, "source iterator failed; ending input early");
                        break;
                    }
                }
                state.add_completed();
            }
            state.mark_work_done();
        }));
    }

    fn join(&mut self) {
        self.queue.join();
        if let Some(handle) = self.handle.take() {
            join_worker(&self.state.name, handle);
        }
    }
}

pub(crate) struct PipeRuntime<P: Pipe> {
    pub(crate) pipe: Arc<P>,
    pub(crate) in_queue: Arc<WorkQueue<P::Input>>,
    pub(crate) upstream: Arc<StageState>,
    pub(crate) out_queue: Arc<WorkQueue<P::Output>>,
    pub(crate) state: Arc<StageState>,
    pub(crate) active_workers: Arc<AtomicUsize>,
    pub(crate) handles: Vec<JoinHandle<()>>,
}

impl<P: Pipe> StageRuntime for PipeRuntime<P> {
    fn start(&mut self) {
        let count = self.pipe.thread_count().max(1);
        self.active_workers.store(count, Ordering::SeqCst);
        for worker in 1..=count {
            let pipe = self.pipe.clone();
            let in_queue = self.in_queue.clone();
            let out_queue = self.out_queue.clone();
            let upstream = self.upstream.clone();
            let state = self.state.clone();
            let active = self.active_workers.clone();
            self.handles
                .push(spawn_worker(format!("{}-run-{worker}", state.name), move || {
                    while !upstream.done() {
                        match in_queue.get(DEFAULT_POLL_TIMEOUT) {
                            Ok(item) => {
                                let emitter = Emitter::new(&out_queue);
                                match pipe.handle_item(item, &emitter) {
                                    Ok(()) => state.add_completed(),
                                    Err(error) => {
                                        tracing::warn!(stage = %state.name, %error, "dropping item after handler failure");
                                    }
                                }
                                in_queue.task_done();
                            }
                            Err(RecvError::Empty) => {}
                        }
                    }
                    // The last worker out flips the stage to done.
                    if active.fetch_sub(1, Ordering::AcqRel) == 1 {
                        state.mark_work_done();
                    }
                }));
        }
    }

    fn join(&mut self) {
        self.out_queue.join();
        for handle in self.handles.drain(..) {
            join_worker(&self.state.name, handle);
        }
        self.pipe.on_close();
    }
}

pub(crate) struct SinkRuntime<S: Sink> {
    pub(crate) sink: Option<S>,
    pub(crate) in_queue: Arc<WorkQueue<S::Input>>,
    pub(crate) upstream: Arc<StageState>,
    pub(crate) state: Arc<StageState>,
    pub(crate) handle: Option<JoinHandle<()>>,
}

impl<S: Sink> StageRuntime for SinkRuntime<S> {
    fn start(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        let in_queue = self.in_queue.clone();
        let upstream = self.upstream.clone();
        let state = self.state.clone();
        self.handle = Some(spawn_worker(format!("{}-run-1", state.name), move || {
            if let Err(error) = sink.open() {
                tracing::error!(stage = %state.name, %error, "failed to open sink output");
            }
            while !upstream.done() {
                match in_queue.get(DEFAULT_POLL_TIMEOUT) {
                    Ok(item) => {
                        match sink.handle_item(item) {
                            Ok(()) => state.add_completed(),
                            Err(error) => {
                                tracing::warn!(stage = %state.name, %error, "dropping item after sink failure");
                            }
                        }
                        in_queue.task_done();
                    }
                    Err(RecvError::Empty) => {}
                }
            }
            state.mark_work_done();
            if let Err(error) = sink.close() {
                tracing::error!(stage = %state.name, %error, "failed to close sink output");
            }
        }));
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            join_worker(&self.state.name, handle);
        }
    }
}
