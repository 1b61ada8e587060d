//! Pull-based PCM access to a compressed track.
//!
//! A reader thread decodes ahead of the consumer into a bounded buffer.
//! Seeking stops the reader and restarts it at the frame holding the new
//! position.

use crate::core::{FrameEntry, WaveFormat};
use crate::decoder::Decoder;
use crate::error::{AudioError, AudioResult};
use crate::filter::{DecodeFilter, TransformFilter};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, warn};
use std::io::{self, Read, Seek, SeekFrom};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Random access to a track's compressed frames
pub trait FrameSource: Send + 'static {
    /// Number of frames in the track
    fn frame_count(&self) -> u64;

    /// Read the frame at `index`
    fn read_frame(&mut self, index: u64) -> AudioResult<FrameEntry>;
}

struct Reader<S> {
    decode: DecodeFilter,
    source: S,
}

impl<S: FrameSource> Reader<S> {
    /// Decode from `first` to the end of the track, stopping early once the
    /// consumer hangs up
    fn run(mut self, first: u64, tx: Sender<AudioResult<Vec<u8>>>) -> Self {
        for index in first..self.source.frame_count() {
            let decoded = self
                .source
                .read_frame(index)
                .and_then(|frame| self.decode.process(frame));
            if !Self::forward(decoded, &tx) {
                return self;
            }
        }

        let trailing = self.decode.flush();
        Self::forward(trailing, &tx);
        self
    }

    fn forward(decoded: AudioResult<Vec<FrameEntry>>, tx: &Sender<AudioResult<Vec<u8>>>) -> bool {
        match decoded {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| !entry.is_empty())
                .all(|entry| tx.send(Ok(entry.payload.as_slice().to_vec())).is_ok()),
            Err(e) => {
                let _ = tx.send(Err(e));
                false
            }
        }
    }
}

/// Decoded PCM of a whole track, readable and seekable like a file.
///
/// Every frame is assumed to decode to the same number of samples, which
/// holds for AAC.
pub struct WaveStream<S: FrameSource> {
    format: WaveFormat,
    bytes_per_frame: u64,
    length: u64,
    buffered_frames: usize,
    position: u64,
    current: Vec<u8>,
    offset: usize,
    skip: usize,
    rx: Option<Receiver<AudioResult<Vec<u8>>>>,
    reader: Option<JoinHandle<Reader<S>>>,
}

impl<S: FrameSource> WaveStream<S> {
    /// Stream `source` through `decoder`, decoding up to `buffer_time` ahead.
    ///
    /// `samples_per_frame` is the per-channel sample count of one decoded frame.
    pub fn new(
        decoder: Box<dyn Decoder>,
        source: S,
        samples_per_frame: u32,
        buffer_time: Duration,
    ) -> AudioResult<Self> {
        let format = decoder.wave_format();
        if format.sample_format().is_planar() {
            return Err(AudioError::ConfigError(
                "A wave stream needs a decoder producing interleaved PCM".to_string(),
            ));
        }
        if samples_per_frame == 0 {
            return Err(AudioError::ConfigError("A frame must hold at least one sample".to_string()));
        }

        let bytes_per_frame = samples_per_frame as u64 * format.block_align() as u64;
        let buffered_frames =
            (buffer_time.as_secs_f64() * format.sample_rate() as f64 / samples_per_frame as f64).round() as usize;

        let mut stream = WaveStream {
            format,
            bytes_per_frame,
            length: source.frame_count() * bytes_per_frame,
            buffered_frames: buffered_frames.max(1),
            position: 0,
            current: Vec::new(),
            offset: 0,
            skip: 0,
            rx: None,
            reader: None,
        };
        stream.start(
            Reader {
                decode: DecodeFilter::new(decoder),
                source,
            },
            0,
        )?;
        Ok(stream)
    }

    /// Format of the PCM bytes
    pub fn wave_format(&self) -> WaveFormat {
        self.format
    }

    /// Total length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Check if the track holds no audio
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current byte position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Playing time of the whole track
    pub fn duration(&self) -> Duration {
        self.time_at(self.length)
    }

    /// Playing time at the current position
    pub fn time_position(&self) -> Duration {
        self.time_at(self.position)
    }

    /// Move to a playing time
    pub fn set_time_position(&mut self, time: Duration) -> AudioResult<()> {
        let offset = self.format.samples_at(time) * self.format.block_align() as u64;
        self.seek_to(offset)
    }

    fn time_at(&self, bytes: u64) -> Duration {
        self.format.duration_of(bytes / self.format.block_align() as u64)
    }

    fn start(&mut self, reader: Reader<S>, first: u64) -> AudioResult<()> {
        let (tx, rx) = bounded(self.buffered_frames);
        let handle = thread::Builder::new()
            .name("wave-stream".to_string())
            .spawn(move || reader.run(first, tx))?;
        self.rx = Some(rx);
        self.reader = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> AudioResult<Option<Reader<S>>> {
        // Hanging up wakes a reader blocked on a full buffer.
        self.rx = None;
        match self.reader.take().map(JoinHandle::join) {
            Some(Ok(reader)) => Ok(Some(reader)),
            Some(Err(_)) => Err(AudioError::DecodeError("The wave stream reader panicked".to_string())),
            None => Ok(None),
        }
    }

    fn seek_to(&mut self, offset: u64) -> AudioResult<()> {
        let offset = offset.min(self.length);
        let offset = offset - offset % self.format.block_align() as u64;
        let frame = offset / self.bytes_per_frame;

        let Some(reader) = self.stop()? else {
            return Err(AudioError::DecodeError("The wave stream reader is gone".to_string()));
        };
        debug!("Seeking wave stream to byte {} (frame {})", offset, frame);

        self.current.clear();
        self.offset = 0;
        self.skip = (offset - frame * self.bytes_per_frame) as usize;
        self.position = offset;
        self.start(reader, frame)
    }

    /// Next decoded frame, or `None` at end of track
    fn next_frame(&mut self) -> AudioResult<Option<Vec<u8>>> {
        let Some(rx) = &self.rx else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(Ok(pcm)) => Ok(Some(pcm)),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None),
        }
    }
}

impl<S: FrameSource> Read for WaveStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            if self.offset == self.current.len() {
                // A decode error must not swallow bytes already copied.
                if copied > 0 {
                    break;
                }
                match self.next_frame().map_err(io::Error::other)? {
                    Some(pcm) => {
                        self.offset = self.skip.min(pcm.len());
                        self.skip = 0;
                        self.current = pcm;
                    }
                    None => break,
                }
                continue;
            }

            let count = (buf.len() - copied).min(self.current.len() - self.offset);
            buf[copied..copied + count].copy_from_slice(&self.current[self.offset..self.offset + count]);
            self.offset += count;
            copied += count;
        }

        self.position += copied as u64;
        Ok(copied)
    }
}

impl<S: FrameSource> Seek for WaveStream<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        self.seek_to(target).map_err(io::Error::other)?;
        Ok(self.position)
    }
}

impl<S: FrameSource> Drop for WaveStream<S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferTracker, Channels, SampleFormat};
    use crate::testing::FakeDecoder;

    /// Frames whose first byte picks the decoded level
    struct Markers {
        tracker: BufferTracker,
        markers: Vec<u8>,
    }

    impl Markers {
        fn new(markers: Vec<u8>) -> Self {
            Markers {
                tracker: BufferTracker::new(),
                markers,
            }
        }
    }

    impl FrameSource for Markers {
        fn frame_count(&self) -> u64 {
            self.markers.len() as u64
        }

        fn read_frame(&mut self, index: u64) -> AudioResult<FrameEntry> {
            let marker = self.markers[index as usize];
            Ok(FrameEntry::new(self.tracker.alloc(vec![marker]), 0, index))
        }
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
    }

    fn stream(markers: Vec<u8>) -> WaveStream<Markers> {
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        WaveStream::new(
            Box::new(FakeDecoder::new(format, 100)),
            Markers::new(markers),
            100,
            Duration::from_millis(200),
        )
        .unwrap()
    }

    #[test]
    fn test_reads_whole_track() {
        let mut wave = stream(vec![1, 2, 3]);
        assert_eq!(wave.len(), 600);
        assert!((wave.duration().as_secs_f64() - 0.3).abs() < 1e-6);

        let mut pcm = Vec::new();
        wave.read_to_end(&mut pcm).unwrap();
        let pcm = samples(&pcm);
        assert_eq!(pcm.len(), 300);
        assert_eq!(pcm[0], 256);
        assert_eq!(pcm[150], 512);
        assert_eq!(pcm[299], 768);
        assert_eq!(wave.position(), 600);
    }

    #[test]
    fn test_seek_lands_inside_frame() {
        let mut wave = stream(vec![1, 2, 3, 4]);
        let mut head = [0u8; 10];
        wave.read_exact(&mut head).unwrap();

        // Odd offsets round down to a whole sample.
        assert_eq!(wave.seek(SeekFrom::Start(251)).unwrap(), 250);
        let mut pcm = Vec::new();
        wave.read_to_end(&mut pcm).unwrap();
        let pcm = samples(&pcm);
        assert_eq!(pcm.len(), 275);
        assert_eq!(pcm[0], 512);
        assert_eq!(pcm[75], 768);
    }

    #[test]
    fn test_time_position() {
        let mut wave = stream(vec![1, 2, 3, 4, 5]);
        wave.set_time_position(Duration::from_millis(300)).unwrap();
        assert_eq!(wave.position(), 600);
        assert!((wave.time_position().as_secs_f64() - 0.3).abs() < 1e-6);

        let mut sample = [0u8; 2];
        wave.read_exact(&mut sample).unwrap();
        assert_eq!(i16::from_le_bytes(sample), 4 * 256);
        assert!(wave.seek(SeekFrom::Current(-10_000)).is_err());
    }

    #[test]
    fn test_decode_error_surfaces_as_io_error() {
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let mut wave = WaveStream::new(
            Box::new(FakeDecoder::new(format, 100).rejecting(9)),
            Markers::new(vec![1, 9, 2]),
            100,
            Duration::from_millis(100),
        )
        .unwrap();

        let mut pcm = Vec::new();
        let err = wave.read_to_end(&mut pcm).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(pcm.len(), 200);
    }

    #[test]
    fn test_planar_decoder_rejected() {
        let format = WaveFormat::new(1000, Channels::Stereo, SampleFormat::Planar16).unwrap();
        let result = WaveStream::new(
            Box::new(FakeDecoder::new(format, 100)),
            Markers::new(vec![1]),
            100,
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(AudioError::ConfigError(_))));
    }
}
