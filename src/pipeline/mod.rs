//! Linear multi-stage pipeline: transform stages chained into one final stage.
//!
//! Every stage runs on its own thread behind a bounded queue. A full queue
//! blocks the producer, so a slow stage throttles everything upstream of it.
//! Flush, cancellation and faults travel along the chain in stage order.

pub mod cancel;
pub mod stage;

pub use cancel::CancellationToken;
pub use stage::{StageInput, StageMonitor, StageState};

use crate::core::FrameEntry;
use crate::error::{AudioError, AudioResult};
use crate::filter::{FinalFilter, TransformFilter};
use log::{debug, info, warn};
use stage::{FaultSlot, StageContext, StageQueue, StageWorker};
use std::any::Any;
use std::thread::JoinHandle;

/// Spawns a transform stage's worker once its downstream input exists
type Launcher = Box<dyn FnOnce(StageWorker, StageInput, StageContext) -> AudioResult<JoinHandle<()>>>;

struct PendingTransform {
    name: String,
    capacity: usize,
    launch: Launcher,
}

/// Builds a pipeline front to back
pub struct PipelineBuilder {
    cancel: CancellationToken,
    transforms: Vec<PendingTransform>,
}

impl PipelineBuilder {
    /// Start a pipeline observing `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        PipelineBuilder {
            cancel,
            transforms: Vec::new(),
        }
    }

    /// Append a transform stage with its own queue capacity
    pub fn link_to<T: TransformFilter>(self, filter: T) -> Self {
        let capacity = filter.queue_capacity();
        self.link_with_capacity(filter, capacity)
    }

    /// Append a transform stage with an explicit queue capacity
    pub fn link_with_capacity<T: TransformFilter>(mut self, filter: T, capacity: usize) -> Self {
        let name = filter.name().to_string();
        let launch: Launcher =
            Box::new(move |worker, downstream, ctx| worker.spawn_transform(filter, downstream, ctx));

        self.transforms.push(PendingTransform {
            name,
            capacity,
            launch,
        });
        self
    }

    /// Terminate the chain with `filter` and start every stage
    pub fn finish<F: FinalFilter>(self, filter: F) -> AudioResult<Pipeline<F::Output>> {
        let capacity = filter.queue_capacity();
        self.finish_with_capacity(filter, capacity)
    }

    /// Terminate the chain with an explicit final queue capacity
    pub fn finish_with_capacity<F: FinalFilter>(
        self,
        filter: F,
        capacity: usize,
    ) -> AudioResult<Pipeline<F::Output>> {
        // Failures cancel the run's own token, never the caller's.
        let cancel = self.cancel.child()?;

        // Validate every queue before any thread starts.
        let mut queues = Vec::with_capacity(self.transforms.len());
        for (position, pending) in self.transforms.iter().enumerate() {
            queues.push(StageQueue::new(position, &pending.name, pending.capacity, &cancel)?);
        }
        let final_queue = StageQueue::new(queues.len(), filter.name(), capacity, &cancel)?;

        let ctx = StageContext {
            cancel: cancel.clone(),
            fault: FaultSlot::default(),
        };

        let mut monitors: Vec<StageMonitor> = queues.iter().map(StageQueue::monitor).collect();
        monitors.push(final_queue.monitor());

        let (mut head, worker) = final_queue.into_parts();
        let mut pipeline = Pipeline {
            head: None,
            cancel,
            fault: ctx.fault.clone(),
            monitors,
            transform_handles: Vec::new(),
            final_handle: Some(worker.spawn_final(filter, ctx.clone())?),
        };

        // Start back to front so each stage can hand off to the one after it.
        // On error, dropping `pipeline` tears down the stages already running.
        for (position, (queue, pending)) in queues.into_iter().zip(self.transforms).enumerate().rev() {
            let (input, worker) = queue.into_parts();
            let handle = (pending.launch)(worker, head, ctx.clone())?;
            pipeline.transform_handles.push((position, handle));
            head = input;
        }
        pipeline.head = Some(head);

        info!("Pipeline started with {} stage(s)", pipeline.monitors.len());
        Ok(pipeline)
    }
}

/// A running pipeline.
///
/// Dropping it without calling [`Pipeline::complete`] cancels every stage
/// and waits for their threads.
pub struct Pipeline<O> {
    head: Option<StageInput>,
    cancel: CancellationToken,
    fault: FaultSlot,
    monitors: Vec<StageMonitor>,
    transform_handles: Vec<(usize, JoinHandle<()>)>,
    final_handle: Option<JoinHandle<Option<O>>>,
}

impl<O> Pipeline<O> {
    /// Submit an entry to the first stage.
    ///
    /// Blocks while the first stage's queue is full.
    pub fn submit(&self, entry: FrameEntry) -> AudioResult<()> {
        let head = self.head.as_ref().ok_or(AudioError::Cancelled)?;
        head.submit(entry)
    }

    /// Request cancellation of every stage.
    ///
    /// Only this run is cancelled; the token passed to the builder is left alone.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared by every stage of this run.
    ///
    /// A child of the builder's token: cancelling the builder's token cancels
    /// it, while faults and [`Pipeline::cancel`] stop only this run.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current state of every stage in chain order
    pub fn stage_states(&self) -> Vec<(String, StageState)> {
        self.monitors
            .iter()
            .map(|m| (m.name().to_string(), m.state()))
            .collect()
    }

    /// Signal end of input and wait for every stage to finish.
    ///
    /// Returns the final stage's output if every stage completed, the first
    /// stage failure as [`AudioError::Faulted`], or [`AudioError::Cancelled`].
    pub fn complete(mut self) -> AudioResult<O> {
        if let Some(head) = self.head.take() {
            match head.flush() {
                Ok(()) => debug!("flush submitted to '{}'", head.name()),
                Err(_) => debug!("pipeline stopped before flush"),
            }
        }

        let output = self.join();

        if let Some(fault) = self.fault.take() {
            return Err(fault);
        }

        match output {
            Some(output) => {
                info!("Pipeline completed");
                Ok(output)
            }
            None => Err(AudioError::Cancelled),
        }
    }

    fn join(&mut self) -> Option<O> {
        // Dropping the head disconnects the first stage if it is still waiting.
        self.head = None;

        for (position, handle) in std::mem::take(&mut self.transform_handles) {
            if let Err(payload) = handle.join() {
                self.stage_panicked(position, payload.as_ref());
            }
        }

        let output = match self.final_handle.take().map(JoinHandle::join) {
            Some(Ok(output)) => output,
            Some(Err(payload)) => {
                self.stage_panicked(self.monitors.len() - 1, payload.as_ref());
                None
            }
            None => None,
        };

        // Every stage has stopped; this also releases the link to the parent token.
        self.cancel.cancel();
        output
    }

    fn stage_panicked(&self, position: usize, payload: &(dyn Any + Send)) {
        let monitor = &self.monitors[position];
        let message = stage::panic_message(payload);
        warn!("stage '{}' panicked: {}", monitor.name(), message);
        self.fault.record(position, monitor.name(), AudioError::StagePanic(message));
        self.cancel.cancel();
        monitor.set(StageState::Faulted);
    }
}

impl<O> Drop for Pipeline<O> {
    fn drop(&mut self) {
        if self.final_handle.is_some() {
            self.cancel.cancel();
            let _ = self.join();
        }
    }
}
