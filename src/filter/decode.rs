use super::TransformFilter;
use crate::core::{BufferTracker, ChunkRef, FrameBuffer, FrameEntry, SampleFormat, WaveFormat};
use crate::decoder::{DecodedFrame, Decoder};
use crate::error::{AudioError, AudioResult};
use log::{debug, warn};

/// Queue capacity of the decode stage
pub const DECODE_QUEUE_CAPACITY: usize = 300;

/// Samples per AAC frame, assumed for skips before the first good frame
const AAC_FRAME_SAMPLES: u64 = 1024;

/// Transform stage turning compressed frames into PCM entries.
///
/// Owns the decode session. Frames the codec rejects as transient are passed
/// on as zero-sample entries while the skip budget lasts.
pub struct DecodeFilter {
    decoder: Box<dyn Decoder>,
    wave_format: WaveFormat,
    skip_budget: u64,
    skipped_samples: u64,
    frame_samples: u64,
    frames_out: u64,
    last_chunk: Option<ChunkRef>,
    tracker: Option<BufferTracker>,
}

impl DecodeFilter {
    /// Create a decode stage around an open session
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        let wave_format = decoder.wave_format();
        let skip_budget = decoder.skip_budget();
        DecodeFilter {
            decoder,
            wave_format,
            skip_budget,
            skipped_samples: 0,
            frame_samples: AAC_FRAME_SAMPLES,
            frames_out: 0,
            last_chunk: None,
            tracker: None,
        }
    }

    /// Override the number of per-channel samples that may be skipped
    pub fn with_skip_budget(mut self, samples: u64) -> Self {
        self.skip_budget = samples;
        self
    }

    /// Format of the PCM this stage emits
    pub fn wave_format(&self) -> WaveFormat {
        self.wave_format
    }

    /// Per-channel samples skipped so far
    pub fn skipped_samples(&self) -> u64 {
        self.skipped_samples
    }

    fn next_index(&mut self) -> u64 {
        let index = self.frames_out;
        self.frames_out += 1;
        index
    }

    fn to_entry(&mut self, like: &FrameBuffer, decoded: DecodedFrame, chunk: Option<ChunkRef>) -> AudioResult<FrameEntry> {
        let index = self.next_index();
        let mut entry = FrameEntry::new(like.derive(decoded.pcm), decoded.sample_count, index).with_chunk(chunk);

        match (self.wave_format.sample_format(), decoded.secondary) {
            (SampleFormat::Planar16, Some(secondary)) => {
                entry = entry.with_secondary(like.derive(secondary));
            }
            (SampleFormat::Planar16, None) if decoded.sample_count > 0 => {
                return Err(AudioError::DecodeError(
                    "Planar decoder produced no second channel".to_string(),
                ));
            }
            _ => {}
        }

        Ok(entry)
    }
}

impl TransformFilter for DecodeFilter {
    fn name(&self) -> &str {
        "decode"
    }

    fn queue_capacity(&self) -> usize {
        DECODE_QUEUE_CAPACITY
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>> {
        let FrameEntry { payload, chunk, .. } = entry;
        self.last_chunk = chunk;
        if self.tracker.is_none() {
            self.tracker = payload.tracker().cloned();
        }

        let output = match self.decoder.decode(payload.as_slice()) {
            Ok(decoded) => {
                if decoded.sample_count > 0 {
                    self.frame_samples = decoded.sample_count as u64;
                }
                self.to_entry(&payload, decoded, chunk)?
            }
            Err(AudioError::InvalidFrame(reason)) => {
                let frame_samples = self.frame_samples;
                if self.skipped_samples + frame_samples > self.skip_budget {
                    return Err(AudioError::DecodeError(format!(
                        "Frame rejected after {} skipped samples: {}",
                        self.skipped_samples, reason
                    )));
                }
                self.skipped_samples += frame_samples;
                warn!(
                    "Skipping undecodable frame ({} of {} samples skipped): {}",
                    self.skipped_samples, self.skip_budget, reason
                );
                let index = self.next_index();
                FrameEntry::skipped(&payload, chunk, index)
            }
            Err(e) => return Err(e),
        };

        // The compressed input is disposed here; only derived buffers travel on.
        drop(payload);
        Ok(vec![output])
    }

    fn flush(&mut self) -> AudioResult<Vec<FrameEntry>> {
        let decoded = self.decoder.flush()?;
        if decoded.is_empty() {
            return Ok(Vec::new());
        }

        debug!("decoder flushed {} trailing samples", decoded.sample_count);
        let like = match &self.tracker {
            Some(tracker) => tracker.alloc(Vec::new()),
            None => FrameBuffer::empty(),
        };
        let chunk = self.last_chunk;
        Ok(vec![self.to_entry(&like, decoded, chunk)?])
    }
}
