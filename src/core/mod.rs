//! Core data types moving through the pipeline

/// Wave format and channel types
pub mod audio;
/// Chapter events and the chapter queue
pub mod chapter;
/// Frame entries and owned frame buffers
pub mod frame;

pub use audio::{
    AAC_SAMPLE_RATES, Channels, MAX_SAMPLE_RATE, SampleFormat, WaveFormat, max_sample_rate,
    sampling_frequency_index,
};
pub use chapter::{ChapterEvent, ChapterQueue, ChapterSender, chapter_queue};
pub use frame::{BufferTracker, ChunkRef, FrameBuffer, FrameEntry};
