//! Decode side of the native codec adapter

pub mod symphonia;

pub use symphonia::SymphoniaAacDecoder;

use crate::core::WaveFormat;
use crate::error::{AudioError, AudioResult};
use ::symphonia::core::io::{BitReaderLtr, ReadBitsLtr};

/// Object type of USAC (xHE-AAC) streams
pub const AUDIO_OBJECT_TYPE_USAC: u8 = 42;

/// PCM produced by one decode call
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Per-channel samples in the output
    pub sample_count: u32,
    /// PCM bytes laid out per the decoder's wave format
    pub pcm: Vec<u8>,
    /// Second channel when the wave format is planar
    pub secondary: Option<Vec<u8>>,
}

impl DecodedFrame {
    /// Check if no samples were produced
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}

/// A stateful decode session for one track.
///
/// Owned by exactly one decode stage and never called from two threads at once.
/// The session is closed when dropped.
pub trait Decoder: Send {
    /// Format of the PCM this session produces
    fn wave_format(&self) -> WaveFormat;

    /// Decode one compressed frame.
    ///
    /// Returns [`AudioError::InvalidFrame`] when the codec rejected the frame
    /// but may recover on later frames; any other error is fatal.
    fn decode(&mut self, compressed: &[u8]) -> AudioResult<DecodedFrame>;

    /// Drain samples still buffered inside the codec
    fn flush(&mut self) -> AudioResult<DecodedFrame> {
        Ok(DecodedFrame::default())
    }

    /// Per-channel samples that may be skipped on transient decode errors
    fn skip_budget(&self) -> u64 {
        0
    }
}

/// Fields of an MPEG-4 AudioSpecificConfig that the decoders need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (2 = AAC LC, 5 = SBR, 42 = USAC, ...)
    pub object_type: u8,
    /// Core sampling frequency in Hz
    pub sample_rate: u32,
    /// Channel configuration (1 = mono, 2 = stereo, ...)
    pub channel_config: u8,
}

impl AudioSpecificConfig {
    /// Parse the leading fields of an AudioSpecificConfig blob
    pub fn parse(asc: &[u8]) -> AudioResult<Self> {
        let mut bits = BitReaderLtr::new(asc);
        let mut read = |count: u32| {
            bits.read_bits_leq32(count)
                .map_err(|_| AudioError::UnsupportedFormat("AudioSpecificConfig is truncated".to_string()))
        };

        let mut object_type = read(5)? as u8;
        if object_type == 31 {
            object_type = 32 + read(6)? as u8;
        }

        let frequency_index = read(4)? as usize;
        let sample_rate = if frequency_index == 0x0f {
            read(24)?
        } else {
            *crate::core::AAC_SAMPLE_RATES
                .get(frequency_index)
                .ok_or_else(|| {
                    AudioError::UnsupportedFormat(format!(
                        "Reserved sampling frequency index {}",
                        frequency_index
                    ))
                })?
        };

        let channel_config = read(4)? as u8;

        Ok(AudioSpecificConfig {
            object_type,
            sample_rate,
            channel_config,
        })
    }

    /// Whether this is a USAC stream
    pub fn is_usac(&self) -> bool {
        self.object_type == AUDIO_OBJECT_TYPE_USAC
    }

    /// Samples a decoder may skip while it seeds itself.
    ///
    /// USAC decoders may reject up to a second of leading frames; other
    /// object types get no allowance.
    pub fn skip_budget(&self) -> u64 {
        if self.is_usac() {
            self.sample_rate as u64
        } else {
            0
        }
    }
}
