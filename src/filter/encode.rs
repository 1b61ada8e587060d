use super::TransformFilter;
use crate::core::{ChunkRef, FrameBuffer, FrameEntry};
use crate::encoder::{EncodedPacket, Encoder};
use crate::error::AudioResult;
use log::debug;

/// Transform stage turning PCM entries into encoded packets.
///
/// Owns the encode session. Codecs with lookahead may return several packets
/// for one entry, or none.
pub struct EncodeFilter {
    encoder: Box<dyn Encoder>,
    packets_out: u64,
    last_chunk: Option<ChunkRef>,
}

impl EncodeFilter {
    /// Create an encode stage around an open session
    pub fn new(encoder: Box<dyn Encoder>) -> Self {
        EncodeFilter {
            encoder,
            packets_out: 0,
            last_chunk: None,
        }
    }

    /// Packets emitted so far
    pub fn packets_out(&self) -> u64 {
        self.packets_out
    }

    fn wrap(&mut self, like: &FrameBuffer, packets: Vec<EncodedPacket>, chunk: Option<ChunkRef>) -> Vec<FrameEntry> {
        packets
            .into_iter()
            .map(|packet| {
                let entry = FrameEntry::new(like.derive(packet.data), packet.sample_count, self.packets_out)
                    .with_chunk(chunk);
                self.packets_out += 1;
                entry
            })
            .collect()
    }
}

impl TransformFilter for EncodeFilter {
    fn name(&self) -> &str {
        "encode"
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>> {
        self.last_chunk = entry.chunk;
        let packets = self.encoder.encode(
            entry.payload.as_slice(),
            entry.secondary_payload.as_ref().map(FrameBuffer::as_slice),
            entry.sample_count,
        )?;
        Ok(self.wrap(&entry.payload, packets, entry.chunk))
    }

    fn flush(&mut self) -> AudioResult<Vec<FrameEntry>> {
        let packets = self.encoder.flush()?;
        debug!("encoder flushed {} trailing packet(s)", packets.len());
        let chunk = self.last_chunk;
        Ok(self.wrap(&FrameBuffer::empty(), packets, chunk))
    }
}
