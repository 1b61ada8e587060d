//! Encode side of the native codec adapter, and the container muxer contract

pub mod pcm;
pub mod wav;

pub use pcm::PcmEncoder;
pub use wav::WavMuxer;

use crate::core::{ChapterEvent, Channels, WaveFormat};
use crate::decoder::AUDIO_OBJECT_TYPE_USAC;
use crate::error::{AudioError, AudioResult};

/// One compressed frame produced by an encoder
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPacket {
    /// Encoded bytes
    pub data: Vec<u8>,
    /// Per-channel samples the packet decodes to
    pub sample_count: u32,
}

/// A stateful encode session.
///
/// Owned by exactly one stage and closed when dropped.
pub trait Encoder: Send {
    /// Feed PCM samples, returning every packet the codec completed
    fn encode(
        &mut self,
        pcm: &[u8],
        secondary: Option<&[u8]>,
        sample_count: u32,
    ) -> AudioResult<Vec<EncodedPacket>>;

    /// Drain packets still buffered inside the codec
    fn flush(&mut self) -> AudioResult<Vec<EncodedPacket>>;
}

/// Opens encode sessions, one per output part
pub trait EncoderFactory: Send {
    /// Open a session for `format` configured by `config`
    fn open(&mut self, format: &WaveFormat, config: &EncoderConfig) -> AudioResult<Box<dyn Encoder>>;
}

impl<F> EncoderFactory for F
where
    F: FnMut(&WaveFormat, &EncoderConfig) -> AudioResult<Box<dyn Encoder>> + Send,
{
    fn open(&mut self, format: &WaveFormat, config: &EncoderConfig) -> AudioResult<Box<dyn Encoder>> {
        self(format, config)
    }
}

/// Tags identifying one output among the outputs of a split
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Track number and track count, present only when both are known
    pub track: Option<(u32, u32)>,
    /// Track title, replacing any title the output would otherwise carry
    pub title: Option<String>,
}

impl TrackInfo {
    /// Whether there is nothing to tag
    pub fn is_empty(&self) -> bool {
        self.track.is_none() && self.title.is_none()
    }
}

/// Receives encoded frames and chapter markers for one output destination.
///
/// Implementations own all container byte layout.
pub trait Muxer: Send {
    /// Append one frame; `new_chunk` marks the first frame of a container chunk
    fn write_frame(&mut self, data: &[u8], new_chunk: bool) -> AudioResult<()>;

    /// Record a chapter for embedding in the output
    fn add_chapter(&mut self, _chapter: &ChapterEvent) -> AudioResult<()> {
        Ok(())
    }

    /// Tag the output with its track number and title
    fn set_track_info(&mut self, _info: &TrackInfo) -> AudioResult<()> {
        Ok(())
    }

    /// Finish the output. Called exactly once.
    fn close(&mut self) -> AudioResult<()>;
}

/// Encoder settings, adjustable per output part
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncoderConfig {
    /// Target bit rate in bits per second
    pub bit_rate: Option<u64>,
    /// Codec-specific quality, used instead of a bit rate when set
    pub quality: Option<f64>,
    /// Output channel layout, if different from the input
    pub channels: Option<Channels>,
}

impl EncoderConfig {
    /// Default settings derived from the source stream.
    ///
    /// Targets the source's average bit rate per channel. USAC compresses
    /// roughly twice as well as AAC LC, so USAC sources get double.
    pub fn for_source(average_bit_rate: u64, channels: Channels, object_type: u8) -> Self {
        let scale = if object_type == AUDIO_OBJECT_TYPE_USAC { 2.0 } else { 1.0 };
        let kbps = (average_bit_rate as f64 / 1024.0 / channels.count() as f64 * scale).round();

        EncoderConfig {
            bit_rate: Some(kbps as u64 * 1000),
            quality: None,
            channels: Some(Channels::Mono),
        }
    }

    /// Set bit rate
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    /// Set quality
    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    /// Check the settings are usable
    pub fn validate(&self) -> AudioResult<()> {
        if self.bit_rate == Some(0) {
            return Err(AudioError::ConfigError("Bit rate must be positive".to_string()));
        }
        if let Some(quality) = self.quality {
            if !quality.is_finite() || quality < 0.0 {
                return Err(AudioError::ConfigError(format!(
                    "Quality must be a non-negative number, got {}",
                    quality
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_for_aac_lc() {
        let config = EncoderConfig::for_source(131_072, Channels::Stereo, 2);
        assert_eq!(config.bit_rate, Some(64_000));
        assert_eq!(config.channels, Some(Channels::Mono));
    }

    #[test]
    fn test_default_config_doubles_for_usac() {
        let config = EncoderConfig::for_source(65_536, Channels::Stereo, AUDIO_OBJECT_TYPE_USAC);
        assert_eq!(config.bit_rate, Some(64_000));
    }

    #[test]
    fn test_config_validation() {
        assert!(EncoderConfig::default().validate().is_ok());
        assert!(EncoderConfig::default().with_bit_rate(0).validate().is_err());
        assert!(EncoderConfig::default().with_quality(-1.0).validate().is_err());
        assert!(EncoderConfig::default().with_quality(0.5).validate().is_ok());
    }

    #[test]
    fn test_closure_factory() {
        let mut opened = 0;
        let mut factory = |format: &WaveFormat, _: &EncoderConfig| -> AudioResult<Box<dyn Encoder>> {
            opened += 1;
            Ok(Box::new(PcmEncoder::new(*format)))
        };
        let format = WaveFormat::pcm16(44100, Channels::Mono).unwrap();
        assert!(factory.open(&format, &EncoderConfig::default()).is_ok());
        drop(factory);
        assert_eq!(opened, 1);
    }
}
