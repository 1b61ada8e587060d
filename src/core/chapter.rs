//! Chapter boundary events and the queue that carries them from a metadata
//! reader into the audio pipeline.
//!
//! The producer side may run on any thread and at any pace. The consumer only
//! ever polls, so a slow metadata reader never stalls audio.

use crate::error::{AudioError, AudioResult};
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use std::cell::Cell;
use std::time::Duration;

/// A chapter read from the source's chapter track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEvent {
    /// Offset of the chapter start from the start of the track
    pub start: Duration,
    /// Offset of the chapter end from the start of the track
    pub end: Duration,
    /// Chapter title
    pub title: String,
}

impl ChapterEvent {
    /// Create a chapter event
    pub fn new(start: Duration, end: Duration, title: impl Into<String>) -> AudioResult<Self> {
        if end < start {
            return Err(AudioError::ConfigError(format!(
                "Chapter end {:?} precedes start {:?}",
                end, start
            )));
        }

        Ok(ChapterEvent {
            start,
            end,
            title: title.into(),
        })
    }

    /// Length of the chapter
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Create a connected chapter sender and queue
pub fn chapter_queue() -> (ChapterSender, ChapterQueue) {
    let (tx, rx) = unbounded();
    (
        ChapterSender {
            tx,
            last_start: None,
        },
        ChapterQueue {
            rx,
            closed: Cell::new(false),
        },
    )
}

/// Producer half, held by the chapter track reader
#[derive(Debug)]
pub struct ChapterSender {
    tx: Sender<ChapterEvent>,
    last_start: Option<Duration>,
}

impl ChapterSender {
    /// Append the next chapter.
    ///
    /// Chapters must arrive in chapter order. An event starting before the
    /// previous one is rejected rather than reordered.
    pub fn push(&mut self, event: ChapterEvent) -> AudioResult<()> {
        if let Some(last) = self.last_start {
            if event.start < last {
                return Err(AudioError::ChapterOrder(format!(
                    "'{}' starts at {:?}, before the previous chapter at {:?}",
                    event.title, event.start, last
                )));
            }
        }

        self.last_start = Some(event.start);
        // The queue owner may already be gone once the pipeline finished.
        if self.tx.send(event).is_err() {
            log::debug!("chapter queue closed, dropping late chapter");
        }
        Ok(())
    }

    /// Append several chapters in order
    pub fn extend<I: IntoIterator<Item = ChapterEvent>>(&mut self, events: I) -> AudioResult<()> {
        events.into_iter().try_for_each(|event| self.push(event))
    }
}

/// Consumer half, polled by the stage that reacts to chapter boundaries
#[derive(Debug)]
pub struct ChapterQueue {
    rx: Receiver<ChapterEvent>,
    closed: Cell<bool>,
}

impl ChapterQueue {
    /// A queue whose chapters are all known up front
    pub fn from_chapters<I: IntoIterator<Item = ChapterEvent>>(events: I) -> AudioResult<Self> {
        let (mut sender, queue) = chapter_queue();
        sender.extend(events)?;
        Ok(queue)
    }

    /// Take the next chapter if one has arrived. Never blocks.
    pub fn try_next(&self) -> Option<ChapterEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Disconnected) => {
                self.closed.set(true);
                None
            }
            Err(TryRecvError::Empty) => None,
        }
    }

    /// True once every chapter was taken and the sender is gone.
    ///
    /// Only a [`ChapterQueue::try_next`] call that came back empty can observe
    /// this, so no chapter can still arrive.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Number of chapters waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if no chapter is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(start: u64, end: u64, title: &str) -> ChapterEvent {
        ChapterEvent::new(Duration::from_secs(start), Duration::from_secs(end), title).unwrap()
    }

    #[test]
    fn test_chapter_event_validation() {
        assert!(ChapterEvent::new(Duration::from_secs(5), Duration::from_secs(4), "bad").is_err());
        assert_eq!(chapter(2, 10, "Two").duration(), Duration::from_secs(8));
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = ChapterQueue::from_chapters(vec![
            chapter(0, 10, "One"),
            chapter(10, 20, "Two"),
            chapter(20, 30, "Three"),
        ])
        .unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_next().unwrap().title, "One");
        assert_eq!(queue.try_next().unwrap().title, "Two");
        assert_eq!(queue.try_next().unwrap().title, "Three");
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn test_try_next_does_not_block_when_empty() {
        let (_sender, queue) = chapter_queue();
        assert!(queue.is_empty());
        assert!(queue.try_next().is_none());
        assert!(!queue.is_closed());
    }

    #[test]
    fn test_queue_closes_after_sender_dropped_and_drained() {
        let queue = ChapterQueue::from_chapters(vec![chapter(0, 10, "One")]).unwrap();
        assert!(!queue.is_closed());
        assert!(queue.try_next().is_some());
        assert!(queue.try_next().is_none());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_out_of_order_chapter_rejected() {
        let (mut sender, queue) = chapter_queue();
        sender.push(chapter(10, 20, "Two")).unwrap();
        let err = sender.push(chapter(0, 10, "One")).unwrap_err();
        assert!(matches!(err, AudioError::ChapterOrder(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_chapters_cross_threads() {
        let (mut sender, queue) = chapter_queue();
        let producer = std::thread::spawn(move || {
            for i in 0..5u64 {
                sender.push(chapter(i * 10, i * 10 + 10, &format!("Chapter {}", i))).unwrap();
            }
        });
        producer.join().unwrap();

        let titles: Vec<String> = std::iter::from_fn(|| queue.try_next()).map(|c| c.title).collect();
        assert_eq!(titles.len(), 5);
        assert_eq!(titles[0], "Chapter 0");
        assert_eq!(titles[4], "Chapter 4");
    }
}
