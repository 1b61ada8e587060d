use crate::error::{AudioError, AudioResult};
use std::time::Duration;

/// Sampling frequencies addressable by an AAC sampling frequency index
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Highest output sample rate the pipeline will produce
pub const MAX_SAMPLE_RATE: u32 = 96000;

/// Channel configuration for decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    /// Mono (1 channel)
    Mono = 1,
    /// Stereo (2 channels)
    Stereo = 2,
}

impl Channels {
    /// Create Channels from channel count
    pub fn from_count(count: u32) -> AudioResult<Self> {
        match count {
            1 => Ok(Channels::Mono),
            2 => Ok(Channels::Stereo),
            n => Err(AudioError::InvalidChannels {
                expected: 2,
                got: n,
            }),
        }
    }

    /// Get the number of channels
    pub fn count(&self) -> u32 {
        *self as u32
    }

    /// Get channel layout name
    pub fn name(&self) -> &'static str {
        match self {
            Channels::Mono => "Mono",
            Channels::Stereo => "Stereo",
        }
    }
}

/// Layout of the PCM bytes carried by a decoded frame entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved signed 16-bit little endian
    Pcm16,
    /// Interleaved 32-bit IEEE float little endian
    Float32,
    /// Signed 16-bit little endian, one buffer per channel.
    /// Channel 0 travels in the entry payload, channel 1 in the secondary payload.
    Planar16,
}

impl SampleFormat {
    /// Bytes occupied by one sample of one channel
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Pcm16 | SampleFormat::Planar16 => 2,
            SampleFormat::Float32 => 4,
        }
    }

    /// Whether channels are split across payload buffers
    pub fn is_planar(&self) -> bool {
        matches!(self, SampleFormat::Planar16)
    }
}

/// Describes decoded PCM flowing between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormat {
    sample_rate: u32,
    channels: Channels,
    sample_format: SampleFormat,
}

impl WaveFormat {
    /// Create a new wave format
    pub fn new(sample_rate: u32, channels: Channels, sample_format: SampleFormat) -> AudioResult<Self> {
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(AudioError::InvalidSampleRate { rate: sample_rate });
        }

        Ok(WaveFormat {
            sample_rate,
            channels,
            sample_format,
        })
    }

    /// Interleaved 16-bit PCM, the format the silence detector scans
    pub fn pcm16(sample_rate: u32, channels: Channels) -> AudioResult<Self> {
        Self::new(sample_rate, channels, SampleFormat::Pcm16)
    }

    /// Get sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get channel configuration
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Get sample layout
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Bytes per sample frame (one sample for every channel)
    pub fn block_align(&self) -> usize {
        self.sample_format.bytes_per_sample() * self.channels.count() as usize
    }

    /// Average bytes per second of PCM in this format
    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }

    /// Same format with a different rate
    pub fn with_sample_rate(self, sample_rate: u32) -> AudioResult<Self> {
        Self::new(sample_rate, self.channels, self.sample_format)
    }

    /// Same format with a different channel layout
    pub fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = channels;
        self
    }

    /// Wall-clock duration of `samples` per-channel samples
    pub fn duration_of(&self, samples: u64) -> Duration {
        Duration::from_secs_f64(samples as f64 / self.sample_rate as f64)
    }

    /// Per-channel sample position of a time offset, rounded to nearest
    pub fn samples_at(&self, offset: Duration) -> u64 {
        (offset.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}

/// Index of `sample_rate` in the AAC sampling frequency table
pub fn sampling_frequency_index(sample_rate: u32) -> Option<usize> {
    AAC_SAMPLE_RATES.iter().position(|&r| r == sample_rate)
}

/// Output rate for a conversion: never above the source, capped at 96 kHz
pub fn max_sample_rate(source_rate: u32, requested: Option<u32>) -> u32 {
    source_rate.min(requested.unwrap_or(MAX_SAMPLE_RATE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_from_count() {
        assert_eq!(Channels::from_count(1).unwrap(), Channels::Mono);
        assert_eq!(Channels::from_count(2).unwrap(), Channels::Stereo);
        assert!(Channels::from_count(0).is_err());
        assert!(Channels::from_count(6).is_err());
    }

    #[test]
    fn test_wave_format_block_align() {
        let stereo = WaveFormat::pcm16(44100, Channels::Stereo).unwrap();
        assert_eq!(stereo.block_align(), 4);
        assert_eq!(stereo.bytes_per_second(), 176_400);

        let float_mono = WaveFormat::new(22050, Channels::Mono, SampleFormat::Float32).unwrap();
        assert_eq!(float_mono.block_align(), 4);
    }

    #[test]
    fn test_wave_format_invalid_rate() {
        assert!(WaveFormat::pcm16(0, Channels::Mono).is_err());
        assert!(WaveFormat::pcm16(192_000, Channels::Mono).is_err());
    }

    #[test]
    fn test_sample_position_round_trip() {
        let format = WaveFormat::pcm16(44100, Channels::Stereo).unwrap();
        assert_eq!(format.samples_at(Duration::from_secs(2)), 88200);
        assert_eq!(format.duration_of(22050), Duration::from_millis(500));
    }

    #[test]
    fn test_sampling_frequency_index() {
        assert_eq!(sampling_frequency_index(44100), Some(4));
        assert_eq!(sampling_frequency_index(7350), Some(12));
        assert_eq!(sampling_frequency_index(44000), None);
    }

    #[test]
    fn test_max_sample_rate() {
        assert_eq!(max_sample_rate(44100, None), 44100);
        assert_eq!(max_sample_rate(44100, Some(22050)), 22050);
        assert_eq!(max_sample_rate(22050, Some(48000)), 22050);
    }
}
