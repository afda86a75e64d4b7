// Copyright The SafeBench Authors
// SPDX-License-Identifier: Apache-2.0

//! Wiring stages together and running them to completion.

use crate::pipe::Pipe;
use crate::sink::Sink;
use crate::source::Source;
use crate::stage::{NoQueue, PipeRuntime, QueueProbe, SinkRuntime, SourceRuntime, StageRuntime, StageState};
use safebench_channel::WorkQueue;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

/// How often the progress callback fires while the pipeline runs.
const PROGRESS_POLL: Duration = Duration::from_millis(50);

/// A progress snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Items the sink has consumed so far.
    pub completed: u64,
}

/// An ordered chain of started-together, joined-in-order stages.
///
/// Build one with [`Pipeline::builder`]; the type system enforces that the
/// chain starts with a [`Source`], ends with a [`Sink`], and that each
/// stage's output type matches the next stage's input type.
pub struct Pipeline {
    stages: Vec<Box<dyn StageRuntime>>,
    sink_state: Arc<StageState>,
}

impl Pipeline {
    /// Starts a builder with `source` at the head.
    pub fn builder<S: Source>(source: S) -> PipelineBuilder<S::Output> {
        let queue = Arc::new(WorkQueue::new(source.queue_capacity()));
        let probe: Arc<dyn QueueProbe> = queue.clone();
        let state = Arc::new(StageState::new(source.name(), probe, None));
        let runtime = SourceRuntime {
            source: Some(source),
            queue: queue.clone(),
            state: state.clone(),
            handle: None,
        };
        PipelineBuilder {
            stages: vec![Box::new(runtime)],
            tail_queue: queue,
            tail_state: state,
        }
    }

    /// Runs the pipeline to completion.
    pub fn run(&mut self) {
        self.run_with_progress(|_| {});
    }

    /// Runs the pipeline to completion, reporting progress along the way.
    ///
    /// The callback fires once before the stages start, periodically while
    /// the sink is still working, and once more after everything joined.
    pub fn run_with_progress<F: FnMut(Progress)>(&mut self, mut progress: F) {
        progress(Progress { completed: 0 });

        for stage in &mut self.stages {
            stage.start();
        }

        while !self.sink_state.done() {
            progress(Progress {
                completed: self.sink_state.completed_count(),
            });
            std::thread::sleep(PROGRESS_POLL);
        }

        for stage in &mut self.stages {
            stage.join();
        }

        progress(Progress {
            completed: self.sink_state.completed_count(),
        });
    }

    /// Items the sink has consumed so far.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.sink_state.completed_count()
    }
}

/// Accumulates stages until the sink completes the pipeline.
pub struct PipelineBuilder<T: Send + 'static> {
    stages: Vec<Box<dyn StageRuntime>>,
    tail_queue: Arc<WorkQueue<T>>,
    tail_state: Arc<StageState>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    /// Appends a middle stage consuming the current tail's output.
    pub fn pipe<P: Pipe<Input = T>>(mut self, pipe: P) -> PipelineBuilder<P::Output> {
        let out_queue = Arc::new(WorkQueue::new(pipe.queue_capacity()));
        let probe: Arc<dyn QueueProbe> = out_queue.clone();
        let state = Arc::new(StageState::new(
            pipe.name(),
            probe,
            Some(self.tail_state.clone()),
        ));
        let runtime = PipeRuntime {
            pipe: Arc::new(pipe),
            in_queue: self.tail_queue,
            upstream: self.tail_state,
            out_queue: out_queue.clone(),
            state: state.clone(),
            active_workers: Arc::new(AtomicUsize::new(0)),
            handles: Vec::new(),
        };
        self.stages.push(Box::new(runtime));
        PipelineBuilder {
            stages: self.stages,
            tail_queue: out_queue,
            tail_state: state,
        }
    }

    /// Terminates the chain with `sink` and returns the runnable pipeline.
    pub fn sink<S: Sink<Input = T>>(mut self, sink: S) -> Pipeline {
        let state = Arc::new(StageState::new(
            sink.name(),
            Arc::new(NoQueue),
            Some(self.tail_state.clone()),
        ));
        let runtime = SinkRuntime {
            sink: Some(sink),
            in_queue: self.tail_queue,
            upstream: self.tail_state,
            state: state.clone(),
            handle: None,
        };
        self.stages.push(Box::new(runtime));
        Pipeline {
            stages: self.stages,
            sink_state: state,
        }
    }
}
