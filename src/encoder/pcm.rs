use super::EncodedPacket;
use crate::core::{SampleFormat, WaveFormat};
use crate::error::{AudioError, AudioResult};

/// Pass-through "encoder" that emits PCM unchanged.
///
/// Planar input is interleaved so the output is always interleaved PCM,
/// suitable for WAV outputs.
pub struct PcmEncoder {
    format: WaveFormat,
}

impl PcmEncoder {
    /// Create a pass-through encoder for `format`
    pub fn new(format: WaveFormat) -> Self {
        PcmEncoder { format }
    }

    /// Interleave two planar 16-bit channels
    fn interleave(left: &[u8], right: &[u8]) -> AudioResult<Vec<u8>> {
        if left.len() != right.len() {
            return Err(AudioError::BufferError(format!(
                "Planar channels differ in length: {} vs {}",
                left.len(),
                right.len()
            )));
        }

        let mut output = Vec::with_capacity(left.len() * 2);
        for (l, r) in left.chunks_exact(2).zip(right.chunks_exact(2)) {
            output.extend_from_slice(l);
            output.extend_from_slice(r);
        }
        Ok(output)
    }
}

impl super::Encoder for PcmEncoder {
    fn encode(
        &mut self,
        pcm: &[u8],
        secondary: Option<&[u8]>,
        sample_count: u32,
    ) -> AudioResult<Vec<EncodedPacket>> {
        if sample_count == 0 {
            return Ok(Vec::new());
        }

        let data = match (self.format.sample_format(), secondary) {
            (SampleFormat::Planar16, Some(right)) => Self::interleave(pcm, right)?,
            (SampleFormat::Planar16, None) => {
                return Err(AudioError::BufferError(
                    "Planar frame is missing its second channel".to_string(),
                ));
            }
            _ => pcm.to_vec(),
        };

        let expected = sample_count as usize * self.format.block_align();
        if data.len() != expected {
            return Err(AudioError::BufferError(format!(
                "Expected {} bytes for {} samples, got {}",
                expected,
                sample_count,
                data.len()
            )));
        }

        Ok(vec![EncodedPacket { data, sample_count }])
    }

    fn flush(&mut self) -> AudioResult<Vec<EncodedPacket>> {
        Ok(Vec::new())
    }
}
