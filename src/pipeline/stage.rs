//! Stage runtime: one worker thread per stage pulling from a bounded queue.

use super::cancel::CancellationToken;
use crate::core::FrameEntry;
use crate::error::{AudioError, AudioResult};
use crate::filter::{FinalFilter, TransformFilter};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use log::{debug, trace, warn};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Lifecycle of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Constructed, worker not yet pulling
    Created,
    /// Pulling and processing entries
    Running,
    /// Upstream exhausted, final buffered work in progress
    Flushing,
    /// Flushed successfully
    Completed,
    /// This stage, or one upstream of it, failed
    Faulted,
    /// Stopped by cancellation
    Cancelled,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StageState::Created,
            1 => StageState::Running,
            2 => StageState::Flushing,
            3 => StageState::Completed,
            4 => StageState::Faulted,
            _ => StageState::Cancelled,
        }
    }

    /// Whether the stage has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Completed | StageState::Faulted | StageState::Cancelled
        )
    }
}

/// Observable state of one stage
#[derive(Debug, Clone)]
pub struct StageMonitor {
    name: String,
    state: Arc<AtomicU8>,
}

impl StageMonitor {
    fn new(name: &str) -> Self {
        StageMonitor {
            name: name.to_string(),
            state: Arc::new(AtomicU8::new(StageState::Created as u8)),
        }
    }

    /// Stage name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> StageState {
        StageState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// First stage failure of a pipeline run
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultSlot {
    inner: Arc<Mutex<Option<Fault>>>,
}

#[derive(Debug)]
struct Fault {
    position: usize,
    stage: String,
    error: AudioError,
}

impl FaultSlot {
    /// Record a failure unless an earlier one is already recorded
    pub(crate) fn record(&self, position: usize, stage: &str, error: AudioError) {
        let mut slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(Fault {
                position,
                stage: stage.to_string(),
                error,
            });
        }
    }

    /// Chain position of the failed stage
    fn position(&self) -> Option<usize> {
        let slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        slot.as_ref().map(|f| f.position)
    }

    /// Take the recorded failure as a pipeline-level error
    pub(crate) fn take(&self) -> Option<AudioError> {
        let mut slot = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        slot.take().map(|f| AudioError::Faulted {
            stage: f.stage,
            source: Box::new(f.error),
        })
    }
}

enum Message {
    Frame(FrameEntry),
    Flush,
}

/// Producer handle for a stage's input queue
#[derive(Debug)]
pub struct StageInput {
    name: String,
    tx: Sender<Message>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Frame(entry) => write!(f, "Frame({})", entry.frame_index),
            Message::Flush => write!(f, "Flush"),
        }
    }
}

impl StageInput {
    /// Name of the stage this input feeds
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand an entry to the stage.
    ///
    /// Blocks while the stage's queue is full. Fails with
    /// [`AudioError::Cancelled`] if cancellation is requested before or while
    /// waiting, or if the stage already stopped.
    pub fn submit(&self, entry: FrameEntry) -> AudioResult<()> {
        self.send(Message::Frame(entry))
    }

    /// Tell the stage upstream is exhausted
    pub fn flush(&self) -> AudioResult<()> {
        self.send(Message::Flush)
    }

    fn send(&self, message: Message) -> AudioResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AudioError::Cancelled);
        }

        select! {
            send(self.tx, message) -> sent => sent.map_err(|_| {
                trace!("stage '{}' stopped accepting input", self.name);
                AudioError::Cancelled
            }),
            recv(self.cancel.signal()) -> _ => Err(AudioError::Cancelled),
        }
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared context handed to every stage worker
#[derive(Clone)]
pub(crate) struct StageContext {
    pub(crate) cancel: CancellationToken,
    pub(crate) fault: FaultSlot,
}

/// How a worker loop ended
enum Exit {
    Completed,
    Failed(AudioError),
    Cancelled,
}

/// A stage's bounded queue before its worker starts
pub(crate) struct StageQueue {
    position: usize,
    monitor: StageMonitor,
    rx: Receiver<Message>,
    input: StageInput,
}

impl StageQueue {
    pub(crate) fn new(position: usize, name: &str, capacity: usize, cancel: &CancellationToken) -> AudioResult<Self> {
        if capacity == 0 {
            return Err(AudioError::ConfigError(format!(
                "Stage '{}' needs a queue capacity of at least 1",
                name
            )));
        }

        let (tx, rx) = bounded(capacity);
        Ok(StageQueue {
            position,
            monitor: StageMonitor::new(name),
            rx,
            input: StageInput {
                name: name.to_string(),
                tx,
                cancel: cancel.clone(),
            },
        })
    }

    pub(crate) fn monitor(&self) -> StageMonitor {
        self.monitor.clone()
    }

    pub(crate) fn into_parts(self) -> (StageInput, StageWorker) {
        (
            self.input,
            StageWorker {
                position: self.position,
                monitor: self.monitor,
                rx: self.rx,
            },
        )
    }
}

/// Consumer side of a stage queue, run on the stage's own thread
pub(crate) struct StageWorker {
    position: usize,
    monitor: StageMonitor,
    rx: Receiver<Message>,
}

impl StageWorker {
    /// Run a transform filter, pushing its output into `downstream`
    pub(crate) fn spawn_transform<T: TransformFilter>(
        self,
        mut filter: T,
        downstream: StageInput,
        ctx: StageContext,
    ) -> AudioResult<JoinHandle<()>> {
        let name = self.monitor.name().to_string();
        let handle = thread::Builder::new()
            .name(format!("filter-{}", name))
            .spawn(move || {
                let exit = self.run(&ctx, |message| match message {
                    Message::Frame(entry) => {
                        for output in filter.process(entry)? {
                            downstream.submit(output)?;
                        }
                        Ok(false)
                    }
                    Message::Flush => {
                        for output in filter.flush()? {
                            downstream.submit(output)?;
                        }
                        downstream.flush()?;
                        Ok(true)
                    }
                });
                self.finish(exit, &ctx);
            })?;
        Ok(handle)
    }

    /// Run a final filter, returning its output if it completed
    pub(crate) fn spawn_final<F: FinalFilter>(
        self,
        mut filter: F,
        ctx: StageContext,
    ) -> AudioResult<JoinHandle<Option<F::Output>>> {
        let name = self.monitor.name().to_string();
        let handle = thread::Builder::new()
            .name(format!("filter-{}", name))
            .spawn(move || {
                let exit = self.run(&ctx, |message| match message {
                    Message::Frame(entry) => filter.process(entry).map(|_| false),
                    Message::Flush => filter.flush().map(|_| true),
                });
                let completed = matches!(exit, Exit::Completed);
                self.finish(exit, &ctx);
                completed.then(|| filter.into_output())
            })?;
        Ok(handle)
    }

    /// Pull messages in submission order until flushed, failed or cancelled.
    /// `handle` returns `Ok(true)` once the flush was processed.
    fn run<H>(&self, ctx: &StageContext, mut handle: H) -> Exit
    where
        H: FnMut(Message) -> AudioResult<bool>,
    {
        self.monitor.set(StageState::Running);
        debug!("stage '{}' running", self.monitor.name());

        loop {
            if ctx.cancel.is_cancelled() {
                return Exit::Cancelled;
            }

            let message = select! {
                recv(self.rx) -> message => message,
                recv(ctx.cancel.signal()) -> _ => return Exit::Cancelled,
            };

            // Upstream dropped its input without flushing: it was torn down.
            let Ok(message) = message else {
                return Exit::Cancelled;
            };

            if matches!(message, Message::Flush) {
                self.monitor.set(StageState::Flushing);
                debug!("stage '{}' flushing", self.monitor.name());
            }

            match catch_unwind(AssertUnwindSafe(|| handle(message))) {
                Ok(Ok(true)) => return Exit::Completed,
                Ok(Ok(false)) => {}
                Ok(Err(AudioError::Cancelled)) => return Exit::Cancelled,
                Ok(Err(e)) => return Exit::Failed(e),
                Err(payload) => return Exit::Failed(AudioError::StagePanic(panic_message(payload.as_ref()))),
            }
        }
    }

    fn finish(&self, exit: Exit, ctx: &StageContext) {
        let name = self.monitor.name();
        let state = match exit {
            Exit::Completed => {
                debug!("stage '{}' completed", name);
                StageState::Completed
            }
            Exit::Failed(error) => {
                warn!("stage '{}' faulted: {}", name, error);
                ctx.fault.record(self.position, name, error);
                ctx.cancel.cancel();
                StageState::Faulted
            }
            Exit::Cancelled => match ctx.fault.position() {
                // Stages downstream of a failure share its fate.
                Some(failed) if failed < self.position => StageState::Faulted,
                _ => StageState::Cancelled,
            },
        };
        self.monitor.set(state);
    }
}
