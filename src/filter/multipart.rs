//! Chapter-synchronized multipart output.
//!
//! Every entry is encoded into the current part. Chapter events are polled
//! from the chapter queue before each entry; an event whose start has been
//! reached closes the current part (draining the encoder first) and opens the
//! next one through the caller's new-part callback.
//!
//! Only audio inside the chapters is written: entries before the first
//! chapter's start, and after the last chapter's end once the chapter queue
//! is closed, are discarded.

use super::FinalFilter;
use crate::core::{ChapterEvent, ChapterQueue, FrameEntry, WaveFormat};
use crate::encoder::{Encoder, EncoderConfig, EncoderFactory, Muxer, TrackInfo};
use crate::error::{AudioError, AudioResult};
use crate::filter::writer::FRAMES_PER_CHUNK;
use log::{debug, info, trace};

/// Queue capacity of the multipart stage
pub const MULTIPART_QUEUE_CAPACITY: usize = 100;

/// What the new-part callback sees, and may change, for each output part
#[derive(Debug, Clone)]
pub struct NewPartContext {
    part_number: u32,
    chapter: Option<ChapterEvent>,
    /// Encoder settings for this part. Changes carry over to later parts.
    pub encoder_config: EncoderConfig,
    /// Track number tag; written only together with `track_count`
    pub track_number: Option<u32>,
    /// Track count tag; written only together with `track_number`
    pub track_count: Option<u32>,
    /// Title tag for this part
    pub track_title: Option<String>,
}

impl NewPartContext {
    /// One-based number of the part being opened
    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    /// Chapter that starts this part, if one is known
    pub fn chapter(&self) -> Option<&ChapterEvent> {
        self.chapter.as_ref()
    }

    /// Tags requested for this part
    pub fn track_info(&self) -> TrackInfo {
        TrackInfo {
            track: self.track_number.zip(self.track_count),
            title: self.track_title.clone(),
        }
    }
}

/// Totals for one closed output part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSummary {
    /// One-based part number
    pub part_number: u32,
    /// Title of the chapter the part was opened for
    pub title: Option<String>,
    /// Encoded frames written
    pub frames_written: u64,
    /// Per-channel samples fed to the part's encoder
    pub samples: u64,
}

/// Every part written by a [`MultipartFilter`], in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitSummary {
    /// Closed parts
    pub parts: Vec<PartSummary>,
    /// Per-channel samples outside every chapter, not written anywhere
    pub samples_discarded: u64,
}

/// Opens the destination for a new part
pub type NewPartCallback = Box<dyn FnMut(&mut NewPartContext) -> AudioResult<Box<dyn Muxer>> + Send>;

struct ActivePart {
    number: u32,
    chapter: Option<ChapterEvent>,
    start_sample: u64,
    encoder: Box<dyn Encoder>,
    muxer: Box<dyn Muxer>,
    frames_in_chunk: u32,
    frames_written: u64,
    samples: u64,
}

impl ActivePart {
    fn write(&mut self, data: &[u8], frames_per_chunk: u32) -> AudioResult<()> {
        let new_chunk = self.frames_in_chunk == 0;
        self.frames_in_chunk = (self.frames_in_chunk + 1) % frames_per_chunk;
        self.muxer.write_frame(data, new_chunk)?;
        self.frames_written += 1;
        Ok(())
    }

    /// Drain the encoder into the muxer and finish the output
    fn close(mut self) -> AudioResult<PartSummary> {
        for packet in self.encoder.flush()? {
            self.muxer.write_frame(&packet.data, false)?;
            self.frames_written += 1;
        }
        self.muxer.close()?;

        info!(
            "Closed part {} ({} frames, {} samples)",
            self.number, self.frames_written, self.samples
        );
        Ok(PartSummary {
            part_number: self.number,
            title: self.chapter.map(|c| c.title),
            frames_written: self.frames_written,
            samples: self.samples,
        })
    }
}

enum WriterState {
    NoWriterOpen,
    WriterOpen(ActivePart),
    Closed,
}

/// Final stage splitting the stream into one output per chapter
pub struct MultipartFilter {
    format: WaveFormat,
    chapters: ChapterQueue,
    pending: Option<ChapterEvent>,
    factory: Box<dyn EncoderFactory>,
    new_part: NewPartCallback,
    encoder_config: EncoderConfig,
    frames_per_chunk: u32,
    position: u64,
    state: WriterState,
    summary: SplitSummary,
}

impl MultipartFilter {
    /// Split PCM in `format` at the chapters arriving on `chapters`.
    ///
    /// `factory` opens an encode session per part; `new_part` supplies each
    /// part's destination and may adjust its encoder settings.
    pub fn new<E, C>(format: WaveFormat, chapters: ChapterQueue, factory: E, new_part: C) -> Self
    where
        E: EncoderFactory + 'static,
        C: FnMut(&mut NewPartContext) -> AudioResult<Box<dyn Muxer>> + Send + 'static,
    {
        MultipartFilter {
            format,
            chapters,
            pending: None,
            factory: Box::new(factory),
            new_part: Box::new(new_part),
            encoder_config: EncoderConfig::default(),
            frames_per_chunk: FRAMES_PER_CHUNK,
            position: 0,
            state: WriterState::NoWriterOpen,
            summary: SplitSummary::default(),
        }
    }

    /// Encoder settings offered to the first part
    pub fn with_encoder_config(mut self, config: EncoderConfig) -> AudioResult<Self> {
        config.validate()?;
        self.encoder_config = config;
        Ok(self)
    }

    /// Change the chunk size
    pub fn with_frames_per_chunk(mut self, frames: u32) -> AudioResult<Self> {
        if frames == 0 {
            return Err(AudioError::ConfigError("A chunk needs at least one frame".to_string()));
        }
        self.frames_per_chunk = frames;
        Ok(self)
    }

    /// Parts closed so far
    pub fn parts_closed(&self) -> usize {
        self.summary.parts.len()
    }

    /// Next queued chapter whose start has been reached, without blocking
    fn poll_due(&mut self) -> Option<ChapterEvent> {
        if self.pending.is_none() {
            self.pending = self.chapters.try_next();
        }

        let due = self
            .pending
            .as_ref()
            .is_some_and(|event| self.format.samples_at(event.start) <= self.position);
        if due { self.pending.take() } else { None }
    }

    fn discard(&mut self, entry: &FrameEntry) {
        trace!("Discarding frame {} outside every chapter", entry.frame_index);
        self.position += entry.sample_count as u64;
        self.summary.samples_discarded += entry.sample_count as u64;
    }

    /// Whether the open part's chapter has ended and no chapter can follow it
    fn past_last_chapter(&self) -> bool {
        let WriterState::WriterOpen(part) = &self.state else {
            return false;
        };
        self.pending.is_none()
            && self.chapters.is_closed()
            && part
                .chapter
                .as_ref()
                .is_some_and(|chapter| self.format.samples_at(chapter.end) <= self.position)
    }

    fn open_part(&mut self, chapter: Option<ChapterEvent>) -> AudioResult<()> {
        let number = self.summary.parts.len() as u32 + 1;
        let mut context = NewPartContext {
            part_number: number,
            chapter,
            encoder_config: self.encoder_config.clone(),
            track_number: None,
            track_count: None,
            track_title: None,
        };

        let mut muxer = (self.new_part)(&mut context)?;
        context.encoder_config.validate()?;
        self.encoder_config = context.encoder_config.clone();

        let tags = context.track_info();
        if !tags.is_empty() {
            muxer.set_track_info(&tags)?;
        }

        let encoder = self.factory.open(&self.format, &self.encoder_config)?;
        if let Some(chapter) = &context.chapter {
            muxer.add_chapter(chapter)?;
        }

        debug!(
            "Opened part {} at sample {} ({})",
            number,
            self.position,
            context.chapter.as_ref().map(|c| c.title.as_str()).unwrap_or("untitled")
        );

        self.state = WriterState::WriterOpen(ActivePart {
            number,
            chapter: context.chapter,
            start_sample: self.position,
            encoder,
            muxer,
            frames_in_chunk: 0,
            frames_written: 0,
            samples: 0,
        });
        Ok(())
    }

    fn close_part(&mut self) -> AudioResult<()> {
        if let WriterState::WriterOpen(part) = std::mem::replace(&mut self.state, WriterState::NoWriterOpen) {
            let summary = part.close()?;
            self.summary.parts.push(summary);
        }
        Ok(())
    }

    /// Give a chapter that starts no later than the open part to that part
    fn attach(part: &mut ActivePart, event: ChapterEvent) -> AudioResult<()> {
        debug!(
            "Chapter '{}' arrived after part {} began, attaching it",
            event.title, part.number
        );
        part.muxer.add_chapter(&event)?;
        if part.chapter.is_none() {
            part.chapter = Some(event);
        }
        Ok(())
    }

    fn on_chapter(&mut self, event: ChapterEvent) -> AudioResult<()> {
        let start = self.format.samples_at(event.start);
        match &mut self.state {
            WriterState::WriterOpen(part) if start <= part.start_sample => return Self::attach(part, event),
            WriterState::Closed => {
                return Err(AudioError::ConfigError("Multipart output already closed".to_string()));
            }
            _ => {}
        }

        if matches!(self.state, WriterState::WriterOpen(_)) {
            if start < self.position {
                debug!("Chapter '{}' arrived {} samples late", event.title, self.position - start);
            }
            self.close_part()?;
        }
        self.open_part(Some(event))
    }
}

impl FinalFilter for MultipartFilter {
    type Output = SplitSummary;

    fn name(&self) -> &str {
        "multipart"
    }

    fn queue_capacity(&self) -> usize {
        MULTIPART_QUEUE_CAPACITY
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<()> {
        match self.state {
            WriterState::Closed => {
                return Err(AudioError::ConfigError("Multipart output already closed".to_string()));
            }
            WriterState::NoWriterOpen => {
                let chapter = self.poll_due();
                if chapter.is_none() && self.pending.is_some() {
                    // The first chapter starts later.
                    self.discard(&entry);
                    return Ok(());
                }
                self.open_part(chapter)?;
            }
            WriterState::WriterOpen(_) => {}
        }

        while let Some(event) = self.poll_due() {
            self.on_chapter(event)?;
        }

        if self.past_last_chapter() {
            self.discard(&entry);
            return Ok(());
        }

        let frames_per_chunk = self.frames_per_chunk;
        let WriterState::WriterOpen(part) = &mut self.state else {
            return Err(AudioError::ConfigError("No output part open".to_string()));
        };

        let packets = part.encoder.encode(
            entry.payload.as_slice(),
            entry.secondary_payload.as_ref().map(|b| b.as_slice()),
            entry.sample_count,
        )?;
        for packet in packets {
            part.write(&packet.data, frames_per_chunk)?;
        }

        part.samples += entry.sample_count as u64;
        self.position += entry.sample_count as u64;
        Ok(())
    }

    fn flush(&mut self) -> AudioResult<()> {
        while let Some(event) = self.pending.take().or_else(|| self.chapters.try_next()) {
            let start = self.format.samples_at(event.start);
            match &mut self.state {
                WriterState::WriterOpen(part) if start <= part.start_sample => Self::attach(part, event)?,
                _ => debug!("Discarding chapter '{}' with no audio", event.title),
            }
        }

        self.close_part()?;
        self.state = WriterState::Closed;
        info!("Multipart output finished with {} part(s)", self.summary.parts.len());
        Ok(())
    }

    fn into_output(self) -> SplitSummary {
        self.summary
    }
}
