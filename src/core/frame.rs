use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts live frame buffers allocated through it.
///
/// Buffers created by [`BufferTracker::alloc`], and every buffer derived from
/// one of them with [`FrameBuffer::derive`], register here and unregister when
/// dropped. A pipeline that disposed every buffer exactly once leaves the
/// count at zero.
#[derive(Debug, Clone, Default)]
pub struct BufferTracker {
    live: Arc<AtomicUsize>,
}

impl BufferTracker {
    /// Create a tracker with no live buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `data` in a buffer counted by this tracker
    pub fn alloc(&self, data: Vec<u8>) -> FrameBuffer {
        self.live.fetch_add(1, Ordering::AcqRel);
        FrameBuffer {
            data,
            tracker: Some(self.clone()),
        }
    }

    /// Number of buffers currently alive
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Exclusively owned byte buffer carried by a [`FrameEntry`].
///
/// Not `Clone`: a buffer moves from stage to stage and is disposed by
/// whichever stage holds it when it is dropped.
pub struct FrameBuffer {
    data: Vec<u8>,
    tracker: Option<BufferTracker>,
}

impl FrameBuffer {
    /// Create an untracked buffer
    pub fn new(data: Vec<u8>) -> Self {
        FrameBuffer {
            data,
            tracker: None,
        }
    }

    /// Empty untracked buffer
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Create a buffer counted by the same tracker as `self`
    pub fn derive(&self, data: Vec<u8>) -> FrameBuffer {
        match &self.tracker {
            Some(tracker) => tracker.alloc(data),
            None => FrameBuffer::new(data),
        }
    }

    /// Tracker counting this buffer, if any
    pub fn tracker(&self) -> Option<&BufferTracker> {
        self.tracker.as_ref()
    }

    /// Get reference to the bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if buffer holds no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shrink the buffer to its first `len` bytes
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(tracker) = &self.tracker {
            tracker.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl AsRef<[u8]> for FrameBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.data.len())
            .field("tracked", &self.tracker.is_some())
            .finish()
    }
}

/// Opaque handle to the container chunk a frame was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChunkRef(pub u64);

/// One audio frame in flight through the pipeline
#[derive(Debug)]
pub struct FrameEntry {
    /// Compressed bitstream or PCM samples
    pub payload: FrameBuffer,
    /// Second channel for planar stereo layouts
    pub secondary_payload: Option<FrameBuffer>,
    /// Decoded per-channel samples this frame represents
    pub sample_count: u32,
    /// Container chunk this frame belongs to, passed through for muxing
    pub chunk: Option<ChunkRef>,
    /// Ordinal of this frame within the track
    pub frame_index: u64,
}

impl FrameEntry {
    /// Create a frame entry with a single payload
    pub fn new(payload: FrameBuffer, sample_count: u32, frame_index: u64) -> Self {
        FrameEntry {
            payload,
            secondary_payload: None,
            sample_count,
            chunk: None,
            frame_index,
        }
    }

    /// Attach the source chunk reference
    pub fn with_chunk(mut self, chunk: Option<ChunkRef>) -> Self {
        self.chunk = chunk;
        self
    }

    /// Attach a second channel buffer
    pub fn with_secondary(mut self, secondary: FrameBuffer) -> Self {
        self.secondary_payload = Some(secondary);
        self
    }

    /// Frame that failed to decode but still advances codec state
    pub fn skipped(like: &FrameBuffer, chunk: Option<ChunkRef>, frame_index: u64) -> Self {
        FrameEntry::new(like.derive(Vec::new()), 0, frame_index).with_chunk(chunk)
    }

    /// Check if frame carries no samples
    pub fn is_empty(&self) -> bool {
        self.sample_count == 0
    }
}
