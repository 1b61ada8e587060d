use super::{AudioSpecificConfig, DecodedFrame};
use crate::core::{Channels, SampleFormat, WaveFormat};
use crate::error::{AudioError, AudioResult};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_AAC, CodecParameters, DecoderOptions};
use symphonia::core::formats::Packet;

/// Samples in one AAC frame
const AAC_FRAME_SAMPLES: u64 = 1024;

/// AAC decoder backed by Symphonia, fed raw access units from a demuxer
pub struct SymphoniaAacDecoder {
    /// Symphonia decoder state
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    /// Output layout
    wave_format: WaveFormat,
    /// Parsed stream configuration
    asc: AudioSpecificConfig,
    /// Presentation timestamp of the next packet
    timestamp: u64,
}

impl SymphoniaAacDecoder {
    /// Create a decoder from an AudioSpecificConfig blob
    pub fn new(asc_blob: &[u8], sample_format: SampleFormat) -> AudioResult<Self> {
        let asc = AudioSpecificConfig::parse(asc_blob)?;
        let channels = Channels::from_count(asc.channel_config as u32)?;

        if sample_format.is_planar() && channels != Channels::Stereo {
            return Err(AudioError::ConfigError(
                "Planar output requires a stereo stream".to_string(),
            ));
        }

        let layout = match channels {
            Channels::Mono => symphonia::core::audio::Channels::FRONT_LEFT,
            Channels::Stereo => {
                symphonia::core::audio::Channels::FRONT_LEFT
                    | symphonia::core::audio::Channels::FRONT_RIGHT
            }
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(asc.sample_rate)
            .with_channels(layout)
            .with_extra_data(asc_blob.to_vec().into_boxed_slice());

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

        let wave_format = WaveFormat::new(asc.sample_rate, channels, sample_format)?;

        log::debug!(
            "opened AAC decoder: object type {}, {} Hz, {}",
            asc.object_type,
            asc.sample_rate,
            channels.name()
        );

        Ok(SymphoniaAacDecoder {
            decoder,
            wave_format,
            asc,
            timestamp: 0,
        })
    }

    /// Get the parsed stream configuration
    pub fn audio_specific_config(&self) -> &AudioSpecificConfig {
        &self.asc
    }
}

/// Copy a Symphonia buffer into little-endian PCM bytes laid out per `wave_format`
fn convert(wave_format: WaveFormat, decoded: AudioBufferRef<'_>) -> AudioResult<DecodedFrame> {
    let frames = decoded.frames();
    let spec = *decoded.spec();

    if spec.channels.count() as u32 != wave_format.channels().count() {
        return Err(AudioError::InvalidChannels {
            expected: wave_format.channels().count(),
            got: spec.channels.count() as u32,
        });
    }

    if frames == 0 {
        return Ok(DecodedFrame::default());
    }

    let capacity = decoded.capacity() as u64;
    let frame = match wave_format.sample_format() {
        SampleFormat::Pcm16 => {
            let mut buf = SampleBuffer::<i16>::new(capacity, spec);
            buf.copy_interleaved_ref(decoded);
            DecodedFrame {
                sample_count: frames as u32,
                pcm: buf.samples().iter().flat_map(|s| s.to_le_bytes()).collect(),
                secondary: None,
            }
        }
        SampleFormat::Float32 => {
            let mut buf = SampleBuffer::<f32>::new(capacity, spec);
            buf.copy_interleaved_ref(decoded);
            DecodedFrame {
                sample_count: frames as u32,
                pcm: buf.samples().iter().flat_map(|s| s.to_le_bytes()).collect(),
                secondary: None,
            }
        }
        SampleFormat::Planar16 => {
            let mut buf = SampleBuffer::<i16>::new(capacity, spec);
            buf.copy_planar_ref(decoded);
            let (left, right) = buf.samples().split_at(frames);
            DecodedFrame {
                sample_count: frames as u32,
                pcm: left.iter().flat_map(|s| s.to_le_bytes()).collect(),
                secondary: Some(right.iter().flat_map(|s| s.to_le_bytes()).collect()),
            }
        }
    };

    Ok(frame)
}

impl super::Decoder for SymphoniaAacDecoder {
    fn wave_format(&self) -> WaveFormat {
        self.wave_format
    }

    fn decode(&mut self, compressed: &[u8]) -> AudioResult<DecodedFrame> {
        let packet = Packet::new_from_slice(0, self.timestamp, AAC_FRAME_SAMPLES, compressed);
        self.timestamp += AAC_FRAME_SAMPLES;

        // Symphonia reports recoverable bitstream errors as DecodeError,
        // which maps to InvalidFrame.
        let wave_format = self.wave_format;
        let decoded = self.decoder.decode(&packet)?;
        convert(wave_format, decoded)
    }

    fn skip_budget(&self) -> u64 {
        self.asc.skip_budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::Decoder;

    #[test]
    fn test_open_aac_lc_stereo() {
        let decoder = SymphoniaAacDecoder::new(&[0x12, 0x10], SampleFormat::Pcm16).unwrap();
        let format = decoder.wave_format();
        assert_eq!(format.sample_rate(), 44100);
        assert_eq!(format.channels(), Channels::Stereo);
        assert_eq!(decoder.skip_budget(), 0);
    }

    #[test]
    fn test_planar_requires_stereo() {
        // AAC LC, 44100 Hz, mono
        let result = SymphoniaAacDecoder::new(&[0x12, 0x08], SampleFormat::Planar16);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_asc() {
        let result = SymphoniaAacDecoder::new(&[0x12], SampleFormat::Pcm16);
        assert!(result.is_err());
    }
}
