use crate::error::AudioResult;
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Shared cancellation signal observed by every stage.
///
/// Besides the flag, the token exposes a channel that disconnects on
/// cancellation, so blocked queue operations can wait on it with `select!`
/// and wake immediately.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        CancellationToken {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            let mut trigger = self
                .inner
                .trigger
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            trigger.take();
        }
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// A token cancelled whenever this one is, that can also be cancelled alone.
    ///
    /// A link thread waits for either token; it exits once either is cancelled,
    /// so the child must eventually be cancelled to release it.
    pub fn child(&self) -> AudioResult<CancellationToken> {
        let child = CancellationToken::new();
        if self.is_cancelled() {
            child.cancel();
            return Ok(child);
        }

        let parent = self.clone();
        let link = child.clone();
        thread::Builder::new()
            .name("cancel-link".to_string())
            .spawn(move || {
                select! {
                    recv(parent.signal()) -> _ => link.cancel(),
                    recv(link.signal()) -> _ => {}
                }
            })?;
        Ok(child)
    }

    /// Channel that becomes ready (disconnected) once cancelled
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
