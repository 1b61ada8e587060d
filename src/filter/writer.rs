use super::FinalFilter;
use crate::core::{ChapterQueue, FrameEntry};
use crate::encoder::Muxer;
use crate::error::{AudioError, AudioResult};
use log::{debug, info};

/// Frames grouped into one container chunk
pub const FRAMES_PER_CHUNK: u32 = 20;

/// Totals reported by a [`WriterFilter`] once its output is closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Frames handed to the muxer
    pub frames_written: u64,
    /// Per-channel samples those frames represent
    pub samples_written: u64,
    /// Chapters handed to the muxer
    pub chapters_written: u64,
}

/// Final stage writing every entry to a single output.
///
/// Marks a new container chunk every [`FRAMES_PER_CHUNK`] frames and embeds
/// chapters as they arrive on an optional chapter queue.
pub struct WriterFilter {
    muxer: Box<dyn Muxer>,
    chapters: Option<ChapterQueue>,
    frames_per_chunk: u32,
    frames_in_chunk: u32,
    summary: WriteSummary,
    closed: bool,
}

impl WriterFilter {
    /// Write to `muxer`
    pub fn new(muxer: Box<dyn Muxer>) -> Self {
        WriterFilter {
            muxer,
            chapters: None,
            frames_per_chunk: FRAMES_PER_CHUNK,
            frames_in_chunk: 0,
            summary: WriteSummary::default(),
            closed: false,
        }
    }

    /// Embed chapters received on `queue`
    pub fn with_chapters(mut self, queue: ChapterQueue) -> Self {
        self.chapters = Some(queue);
        self
    }

    /// Change the chunk size
    pub fn with_frames_per_chunk(mut self, frames: u32) -> AudioResult<Self> {
        if frames == 0 {
            return Err(AudioError::ConfigError("A chunk needs at least one frame".to_string()));
        }
        self.frames_per_chunk = frames;
        Ok(self)
    }

    fn drain_chapters(&mut self) -> AudioResult<()> {
        let Some(queue) = &self.chapters else {
            return Ok(());
        };

        while let Some(chapter) = queue.try_next() {
            debug!("embedding chapter '{}' at {:?}", chapter.title, chapter.start);
            self.muxer.add_chapter(&chapter)?;
            self.summary.chapters_written += 1;
        }
        Ok(())
    }
}

impl FinalFilter for WriterFilter {
    type Output = WriteSummary;

    fn name(&self) -> &str {
        "writer"
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<()> {
        self.drain_chapters()?;

        if entry.payload.is_empty() {
            return Ok(());
        }

        let new_chunk = self.frames_in_chunk == 0;
        self.frames_in_chunk += 1;
        if self.frames_in_chunk == self.frames_per_chunk {
            self.frames_in_chunk = 0;
        }

        self.muxer.write_frame(entry.payload.as_slice(), new_chunk)?;
        self.summary.frames_written += 1;
        self.summary.samples_written += entry.sample_count as u64;
        Ok(())
    }

    fn flush(&mut self) -> AudioResult<()> {
        self.drain_chapters()?;
        if !self.closed {
            self.closed = true;
            self.muxer.close()?;
            info!(
                "Output closed: {} frames, {} chapters",
                self.summary.frames_written, self.summary.chapters_written
            );
        }
        Ok(())
    }

    fn into_output(self) -> WriteSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferTracker, ChapterEvent, FrameBuffer, chapter_queue};
    use crate::testing::RecordingMuxer;
    use std::time::Duration;

    #[test]
    fn test_marks_chunk_every_twenty_frames() {
        let tracker = BufferTracker::new();
        let muxer = RecordingMuxer::new();
        let mut writer = WriterFilter::new(Box::new(muxer.clone()));

        for i in 0..45 {
            writer.process(FrameEntry::new(tracker.alloc(vec![1; 4]), 1024, i)).unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(muxer.chunk_starts(), vec![0, 20, 40]);
        assert_eq!(muxer.closed(), 1);
        let summary = writer.into_output();
        assert_eq!(summary.frames_written, 45);
        assert_eq!(summary.samples_written, 45 * 1024);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_skipped_frames_are_not_written() {
        let muxer = RecordingMuxer::new();
        let mut writer = WriterFilter::new(Box::new(muxer.clone()));
        writer.process(FrameEntry::new(FrameBuffer::empty(), 0, 0)).unwrap();
        writer.process(FrameEntry::new(FrameBuffer::new(vec![7]), 1024, 1)).unwrap();
        assert_eq!(muxer.frame_count(), 1);
        assert_eq!(muxer.chunk_starts(), vec![0]);
    }

    #[test]
    fn test_embeds_chapters_as_they_arrive() {
        let muxer = RecordingMuxer::new();
        let (mut sender, queue) = chapter_queue();
        let mut writer = WriterFilter::new(Box::new(muxer.clone())).with_chapters(queue);

        sender
            .push(ChapterEvent::new(Duration::ZERO, Duration::from_secs(5), "One").unwrap())
            .unwrap();
        writer.process(FrameEntry::new(FrameBuffer::new(vec![1]), 1024, 0)).unwrap();
        sender
            .push(ChapterEvent::new(Duration::from_secs(5), Duration::from_secs(9), "Two").unwrap())
            .unwrap();
        writer.flush().unwrap();

        let log = muxer.log.lock().unwrap();
        let titles: Vec<_> = log.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn test_flush_closes_once() {
        let muxer = RecordingMuxer::new();
        let mut writer = WriterFilter::new(Box::new(muxer.clone()));
        writer.flush().unwrap();
        writer.flush().unwrap();
        assert_eq!(muxer.closed(), 1);
        assert!(WriterFilter::new(Box::new(muxer)).with_frames_per_chunk(0).is_err());
    }
}
