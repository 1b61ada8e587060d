use super::TransformFilter;
use crate::core::{Channels, FrameEntry, SampleFormat, WaveFormat};
use crate::error::{AudioError, AudioResult};

/// Audio channel remixer - converts PCM entries between mono and stereo
pub struct Remix {
    input: WaveFormat,
    output: WaveFormat,
}

impl Remix {
    /// Create a remixer from `input` to `output_channels`.
    ///
    /// Planar input is always written out interleaved.
    pub fn new(input: WaveFormat, output_channels: Channels) -> AudioResult<Self> {
        let sample_format = match input.sample_format() {
            SampleFormat::Planar16 => SampleFormat::Pcm16,
            other => other,
        };
        let output = WaveFormat::new(input.sample_rate(), output_channels, sample_format)?;
        Ok(Remix { input, output })
    }

    /// Format of the entries this stage emits
    pub fn output_format(&self) -> WaveFormat {
        self.output
    }

    /// Remix stereo to mono by averaging channels
    fn stereo_to_mono(input: &[f32]) -> Vec<f32> {
        input
            .chunks_exact(2)
            .map(|pair| (pair[0] + pair[1]) / 2.0)
            .collect()
    }

    /// Remix mono to stereo by duplicating the channel
    fn mono_to_stereo(input: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(input.len() * 2);
        for &sample in input {
            output.push(sample);
            output.push(sample);
        }
        output
    }

    /// Interleave two planar channels
    fn interleave(left: &[f32], right: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(left.len() * 2);
        for (&l, &r) in left.iter().zip(right) {
            output.push(l);
            output.push(r);
        }
        output
    }

    fn samples(&self, entry: &FrameEntry) -> AudioResult<Vec<f32>> {
        let primary = decode_samples(self.input.sample_format(), entry.payload.as_slice());
        if !self.input.sample_format().is_planar() {
            return Ok(primary);
        }

        let secondary = entry
            .secondary_payload
            .as_ref()
            .ok_or_else(|| AudioError::BufferError("Planar frame is missing its second channel".to_string()))?;
        let secondary = decode_samples(self.input.sample_format(), secondary.as_slice());
        Ok(Self::interleave(&primary, &secondary))
    }
}

/// Read little endian samples as floats in [-1, 1)
pub(crate) fn decode_samples(format: SampleFormat, bytes: &[u8]) -> Vec<f32> {
    match format {
        SampleFormat::Float32 => bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        SampleFormat::Pcm16 | SampleFormat::Planar16 => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
    }
}

/// Write floats back as little endian samples, clamping 16-bit output
pub(crate) fn encode_samples(format: SampleFormat, samples: &[f32]) -> Vec<u8> {
    match format {
        SampleFormat::Float32 => samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        SampleFormat::Pcm16 | SampleFormat::Planar16 => samples
            .iter()
            .flat_map(|s| ((s * 32768.0).round().clamp(-32768.0, 32767.0) as i16).to_le_bytes())
            .collect(),
    }
}

impl TransformFilter for Remix {
    fn name(&self) -> &str {
        "remix"
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>> {
        if entry.is_empty() {
            return Ok(vec![entry]);
        }

        let samples = self.samples(&entry)?;
        let expected = entry.sample_count as usize * self.input.channels().count() as usize;
        if samples.len() != expected {
            return Err(AudioError::InvalidChannels {
                expected: self.input.channels().count(),
                got: (samples.len() / entry.sample_count.max(1) as usize) as u32,
            });
        }

        let output_samples = match (self.input.channels(), self.output.channels()) {
            (Channels::Mono, Channels::Mono) | (Channels::Stereo, Channels::Stereo) => samples,
            (Channels::Stereo, Channels::Mono) => Self::stereo_to_mono(&samples),
            (Channels::Mono, Channels::Stereo) => Self::mono_to_stereo(&samples),
        };

        let FrameEntry {
            payload,
            sample_count,
            chunk,
            frame_index,
            ..
        } = entry;

        let data = encode_samples(self.output.sample_format(), &output_samples);
        Ok(vec![
            FrameEntry::new(payload.derive(data), sample_count, frame_index).with_chunk(chunk),
        ])
    }
}
