//! In-crate fakes for the codec and container collaborators

use crate::core::{ChapterEvent, SampleFormat, WaveFormat};
use crate::decoder::{DecodedFrame, Decoder};
use crate::encoder::{EncodedPacket, Encoder, EncoderConfig, Muxer, TrackInfo};
use crate::error::{AudioError, AudioResult};
use std::sync::{Arc, Mutex};

/// Decoder whose output level is chosen by the compressed bytes.
///
/// Every sample of a decoded frame equals `payload[0] as i16 * 256`, so a
/// frame of `[0]` decodes to digital silence and `[10]` to a loud frame.
pub struct FakeDecoder {
    format: WaveFormat,
    samples_per_frame: u32,
    reject_marker: Option<u8>,
    trailing: u32,
    skip_budget: u64,
}

impl FakeDecoder {
    pub fn new(format: WaveFormat, samples_per_frame: u32) -> Self {
        FakeDecoder {
            format,
            samples_per_frame,
            reject_marker: None,
            trailing: 0,
            skip_budget: 0,
        }
    }

    /// Reject frames starting with `marker` as transient errors
    pub fn rejecting(mut self, marker: u8) -> Self {
        self.reject_marker = Some(marker);
        self
    }

    /// Samples returned by `flush`
    pub fn with_trailing(mut self, samples: u32) -> Self {
        self.trailing = samples;
        self
    }

    pub fn with_skip_budget(mut self, samples: u64) -> Self {
        self.skip_budget = samples;
        self
    }

    fn render(&self, level: i16, samples: u32) -> DecodedFrame {
        let channels = self.format.channels().count() as usize;
        let samples = samples as usize;

        match self.format.sample_format() {
            SampleFormat::Pcm16 => DecodedFrame {
                sample_count: samples as u32,
                pcm: level.to_le_bytes().repeat(samples * channels),
                secondary: None,
            },
            SampleFormat::Float32 => DecodedFrame {
                sample_count: samples as u32,
                pcm: (level as f32 / 32768.0).to_le_bytes().repeat(samples * channels),
                secondary: None,
            },
            SampleFormat::Planar16 => DecodedFrame {
                sample_count: samples as u32,
                pcm: level.to_le_bytes().repeat(samples),
                secondary: Some(level.to_le_bytes().repeat(samples)),
            },
        }
    }
}

impl Decoder for FakeDecoder {
    fn wave_format(&self) -> WaveFormat {
        self.format
    }

    fn decode(&mut self, compressed: &[u8]) -> AudioResult<DecodedFrame> {
        let marker = compressed.first().copied().unwrap_or(0);
        if Some(marker) == self.reject_marker {
            return Err(AudioError::InvalidFrame(format!("marker {:#04x}", marker)));
        }
        Ok(self.render(marker as i16 * 256, self.samples_per_frame))
    }

    fn flush(&mut self) -> AudioResult<DecodedFrame> {
        let trailing = std::mem::take(&mut self.trailing);
        Ok(self.render(0, trailing))
    }

    fn skip_budget(&self) -> u64 {
        self.skip_budget
    }
}

/// What a [`RecordingEncoder`] saw
#[derive(Debug, Default)]
pub struct EncodeLog {
    pub opened: Vec<EncoderConfig>,
    pub flushed: usize,
}

/// Encoder echoing PCM as packets, holding the last packet back until flush
pub struct RecordingEncoder {
    held: Option<EncodedPacket>,
    log: Arc<Mutex<EncodeLog>>,
}

impl RecordingEncoder {
    pub fn open(config: &EncoderConfig, log: &Arc<Mutex<EncodeLog>>) -> Self {
        log.lock().unwrap().opened.push(config.clone());
        RecordingEncoder {
            held: None,
            log: Arc::clone(log),
        }
    }
}

impl Encoder for RecordingEncoder {
    fn encode(&mut self, pcm: &[u8], _secondary: Option<&[u8]>, sample_count: u32) -> AudioResult<Vec<EncodedPacket>> {
        if sample_count == 0 {
            return Ok(Vec::new());
        }
        let packet = EncodedPacket {
            data: pcm.to_vec(),
            sample_count,
        };
        Ok(self.held.replace(packet).into_iter().collect())
    }

    fn flush(&mut self) -> AudioResult<Vec<EncodedPacket>> {
        self.log.lock().unwrap().flushed += 1;
        Ok(self.held.take().into_iter().collect())
    }
}

/// Everything a [`RecordingMuxer`] received
#[derive(Debug, Default)]
pub struct MuxLog {
    pub frames: Vec<(Vec<u8>, bool)>,
    pub chapters: Vec<ChapterEvent>,
    pub track_info: Option<TrackInfo>,
    pub closed: usize,
}

/// Muxer that records writes into a shared log
#[derive(Clone, Default)]
pub struct RecordingMuxer {
    pub log: Arc<Mutex<MuxLog>>,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.log.lock().unwrap().frames.len()
    }

    pub fn closed(&self) -> usize {
        self.log.lock().unwrap().closed
    }

    pub fn chunk_starts(&self) -> Vec<usize> {
        let log = self.log.lock().unwrap();
        log.frames
            .iter()
            .enumerate()
            .filter(|(_, (_, new_chunk))| *new_chunk)
            .map(|(i, _)| i)
            .collect()
    }
}

impl Muxer for RecordingMuxer {
    fn write_frame(&mut self, data: &[u8], new_chunk: bool) -> AudioResult<()> {
        let mut log = self.log.lock().unwrap();
        if log.closed > 0 {
            return Err(AudioError::EncodeError("write after close".to_string()));
        }
        log.frames.push((data.to_vec(), new_chunk));
        Ok(())
    }

    fn add_chapter(&mut self, chapter: &ChapterEvent) -> AudioResult<()> {
        self.log.lock().unwrap().chapters.push(chapter.clone());
        Ok(())
    }

    fn set_track_info(&mut self, info: &TrackInfo) -> AudioResult<()> {
        self.log.lock().unwrap().track_info = Some(info.clone());
        Ok(())
    }

    fn close(&mut self) -> AudioResult<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}

/// Initialise logging for a test run
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
