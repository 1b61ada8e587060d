use crate::core::{SampleFormat, WaveFormat};
use crate::error::{AudioError, AudioResult};
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

/// WAV output destination.
///
/// Accepts interleaved PCM frames (16-bit or float, per the wave format).
pub struct WavMuxer<W: Write + Seek> {
    writer: Option<WavWriter<W>>,
    format: WaveFormat,
    frames_written: u64,
}

impl WavMuxer<BufWriter<File>> {
    /// Create a WAV file at `path`
    pub fn create<P: AsRef<Path>>(path: P, format: WaveFormat) -> AudioResult<Self> {
        let writer = WavWriter::create(path, Self::spec(format))
            .map_err(|e| AudioError::EncodeError(e.to_string()))?;
        Ok(Self::from_writer(writer, format))
    }
}

impl<W: Write + Seek> WavMuxer<W> {
    /// Write WAV data to an arbitrary seekable stream
    pub fn new(inner: W, format: WaveFormat) -> AudioResult<Self> {
        let writer = WavWriter::new(inner, Self::spec(format))
            .map_err(|e| AudioError::EncodeError(e.to_string()))?;
        Ok(Self::from_writer(writer, format))
    }

    fn from_writer(writer: WavWriter<W>, format: WaveFormat) -> Self {
        WavMuxer {
            writer: Some(writer),
            format,
            frames_written: 0,
        }
    }

    fn spec(format: WaveFormat) -> WavSpec {
        let (bits_per_sample, sample_format) = match format.sample_format() {
            SampleFormat::Float32 => (32, hound::SampleFormat::Float),
            SampleFormat::Pcm16 | SampleFormat::Planar16 => (16, hound::SampleFormat::Int),
        };

        WavSpec {
            channels: format.channels().count() as u16,
            sample_rate: format.sample_rate(),
            bits_per_sample,
            sample_format,
        }
    }

    /// Get the wave format
    pub fn format(&self) -> WaveFormat {
        self.format
    }

    /// Get the number of frames written
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Get the number of samples written
    pub fn samples_written(&self) -> u32 {
        self.writer.as_ref().map(|w| w.len()).unwrap_or(0)
    }
}

impl<W: Write + Seek + Send> super::Muxer for WavMuxer<W> {
    fn write_frame(&mut self, data: &[u8], _new_chunk: bool) -> AudioResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| AudioError::EncodeError("WAV writer already closed".to_string()))?;

        match self.format.sample_format() {
            SampleFormat::Float32 => {
                for bytes in data.chunks_exact(4) {
                    writer.write_sample(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))?;
                }
            }
            SampleFormat::Pcm16 | SampleFormat::Planar16 => {
                for bytes in data.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))?;
                }
            }
        }

        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> AudioResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}
