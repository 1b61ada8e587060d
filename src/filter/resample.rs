use super::TransformFilter;
use super::remix::{decode_samples, encode_samples};
use crate::core::{ChunkRef, FrameBuffer, FrameEntry, WaveFormat};
use crate::error::{AudioError, AudioResult};
use log::debug;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

/// Input frames handed to rubato per call
const CHUNK_FRAMES: usize = 1024;

/// Streaming sample rate converter for interleaved PCM entries.
///
/// Input is buffered per channel and converted whenever a full rubato chunk is
/// available, so output entries do not line up one-to-one with input entries.
pub struct Resample {
    input: WaveFormat,
    output: WaveFormat,
    resampler: FastFixedIn<f32>,
    pending: Vec<Vec<f32>>,
    delay_to_skip: usize,
    frames_in: u64,
    frames_out: u64,
    entries_out: u64,
    last_chunk: Option<ChunkRef>,
}

impl Resample {
    /// Create a resampler from `input` to `output_rate`
    pub fn new(input: WaveFormat, output_rate: u32) -> AudioResult<Self> {
        if input.sample_format().is_planar() {
            return Err(AudioError::ConfigError(
                "Resampling needs interleaved input".to_string(),
            ));
        }
        let output = input.with_sample_rate(output_rate)?;
        let channels = input.channels().count() as usize;

        let resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input.sample_rate() as f64,
            1.0,
            PolynomialDegree::Septic,
            CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| AudioError::ConfigError(format!("Failed to create resampler: {}", e)))?;

        debug!(
            "Resampling from {}Hz to {}Hz ({} channels)",
            input.sample_rate(),
            output_rate,
            channels
        );

        Ok(Resample {
            input,
            output,
            delay_to_skip: resampler.output_delay(),
            resampler,
            pending: vec![Vec::new(); channels],
            frames_in: 0,
            frames_out: 0,
            entries_out: 0,
            last_chunk: None,
        })
    }

    /// Get the input sample rate
    pub fn input_rate(&self) -> u32 {
        self.input.sample_rate()
    }

    /// Get the output sample rate
    pub fn output_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    /// Format of the entries this stage emits
    pub fn output_format(&self) -> WaveFormat {
        self.output
    }

    /// Get the ratio of output to input sample rate
    pub fn ratio(&self) -> f64 {
        self.output.sample_rate() as f64 / self.input.sample_rate() as f64
    }

    /// Convert interleaved samples to one vector per channel
    fn deinterleave(samples: &[f32], planar: &mut [Vec<f32>]) {
        let channels = planar.len();
        for frame in samples.chunks_exact(channels) {
            for (channel, &sample) in planar.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
    }

    /// Convert per-channel vectors to interleaved samples
    fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
        let frames = planar.first().map(Vec::len).unwrap_or(0);
        let mut interleaved = Vec::with_capacity(frames * planar.len());
        for frame in 0..frames {
            for channel in planar {
                interleaved.push(channel[frame]);
            }
        }
        interleaved
    }

    /// Append converted output, dropping the resampler's startup delay
    fn collect(&mut self, mut converted: Vec<Vec<f32>>, into: &mut Vec<Vec<f32>>) {
        let produced = converted.first().map(Vec::len).unwrap_or(0);
        let skip = self.delay_to_skip.min(produced);
        self.delay_to_skip -= skip;

        for (out, channel) in into.iter_mut().zip(converted.iter_mut()) {
            out.extend(channel.drain(skip..));
        }
    }

    fn convert_ready(&mut self) -> AudioResult<Vec<Vec<f32>>> {
        let mut output = vec![Vec::new(); self.pending.len()];

        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let converted = self
                .resampler
                .process(chunk.as_slice(), None)
                .map_err(|e| AudioError::BufferError(format!("Resampling failed: {}", e)))?;
            self.collect(converted, &mut output);
        }

        Ok(output)
    }

    fn emit(&mut self, like: &FrameBuffer, planar: &[Vec<f32>], chunk: Option<ChunkRef>) -> Option<FrameEntry> {
        let frames = planar.first().map(Vec::len).unwrap_or(0);
        if frames == 0 {
            return None;
        }

        self.frames_out += frames as u64;
        let data = encode_samples(self.output.sample_format(), &Self::interleave(planar));
        let entry = FrameEntry::new(like.derive(data), frames as u32, self.entries_out).with_chunk(chunk);
        self.entries_out += 1;
        Some(entry)
    }
}

impl TransformFilter for Resample {
    fn name(&self) -> &str {
        "resample"
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>> {
        self.last_chunk = entry.chunk;

        if entry.is_empty() {
            let mut entry = entry;
            entry.frame_index = self.entries_out;
            self.entries_out += 1;
            return Ok(vec![entry]);
        }

        let samples = decode_samples(self.input.sample_format(), entry.payload.as_slice());
        Self::deinterleave(&samples, &mut self.pending);
        self.frames_in += entry.sample_count as u64;

        let converted = self.convert_ready()?;
        Ok(self.emit(&entry.payload, &converted, entry.chunk).into_iter().collect())
    }

    fn flush(&mut self) -> AudioResult<Vec<FrameEntry>> {
        let expected = (self.frames_in as f64 * self.ratio()).round() as u64;
        let mut output = vec![Vec::new(); self.pending.len()];

        let rest = std::mem::replace(&mut self.pending, vec![Vec::new(); output.len()]);
        if rest.first().is_some_and(|c| !c.is_empty()) {
            let converted = self
                .resampler
                .process_partial(Some(rest.as_slice()), None)
                .map_err(|e| AudioError::BufferError(format!("Resampling failed: {}", e)))?;
            self.collect(converted, &mut output);
        }

        // Push the delayed tail out of the filter with silence.
        let mut rounds = 0;
        while self.frames_out + (output[0].len() as u64) < expected && rounds < 8 {
            let converted = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| AudioError::BufferError(format!("Resampling failed: {}", e)))?;
            self.collect(converted, &mut output);
            rounds += 1;
        }

        let keep = expected.saturating_sub(self.frames_out) as usize;
        for channel in output.iter_mut() {
            channel.truncate(keep);
        }

        let chunk = self.last_chunk;
        Ok(self.emit(&FrameBuffer::empty(), &output, chunk).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferTracker, Channels, SampleFormat};

    fn tone(frames: usize, channels: usize) -> Vec<u8> {
        (0..frames * channels)
            .map(|i| ((i as f32 * 0.01).sin() * 8000.0) as i16)
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }

    #[test]
    fn test_resample_creation() {
        let format = WaveFormat::pcm16(44100, Channels::Stereo).unwrap();
        let r = Resample::new(format, 16000).unwrap();
        assert_eq!(r.input_rate(), 44100);
        assert_eq!(r.output_rate(), 16000);
        assert_eq!(r.output_format().channels(), Channels::Stereo);
    }

    #[test]
    fn test_resample_invalid_rate() {
        let format = WaveFormat::pcm16(44100, Channels::Stereo).unwrap();
        assert!(Resample::new(format, 0).is_err());

        let planar = WaveFormat::new(44100, Channels::Stereo, SampleFormat::Planar16).unwrap();
        assert!(matches!(Resample::new(planar, 22050), Err(AudioError::ConfigError(_))));
    }

    #[test]
    fn test_deinterleave_and_interleave() {
        let mut planar = vec![Vec::new(), Vec::new()];
        Resample::deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &mut planar);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);
        assert_eq!(Resample::interleave(&planar), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_streamed_output_length_matches_ratio() {
        let tracker = BufferTracker::new();
        let format = WaveFormat::pcm16(48000, Channels::Stereo).unwrap();
        let mut resample = Resample::new(format, 24000).unwrap();

        let mut total = 0u64;
        let mut indices = Vec::new();
        for i in 0..10 {
            let entry = FrameEntry::new(tracker.alloc(tone(1000, 2)), 1000, i);
            for out in resample.process(entry).unwrap() {
                assert_eq!(out.payload.len(), out.sample_count as usize * 4);
                total += out.sample_count as u64;
                indices.push(out.frame_index);
            }
        }
        for out in resample.flush().unwrap() {
            total += out.sample_count as u64;
            indices.push(out.frame_index);
        }

        assert_eq!(total, 5000);
        assert!(indices.windows(2).all(|w| w[0] + 1 == w[1]));
        assert_eq!(tracker.live(), 0);
    }
}
