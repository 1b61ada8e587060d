#![warn(missing_docs)]

//! # Frame Filters: Streaming Audio Frame Pipeline
//!
//! Decodes compressed audio frames, converts the PCM, and hands it to a final
//! stage, with every stage on its own thread behind a bounded queue.
//!
//! ## Features
//!
//! - **Pipeline** - Transform and final stages with backpressure, flush, cancellation and fault propagation
//! - **Silence** - Lane-parallel silence detection over 16-bit PCM
//! - **Transcode** - Decode, remix, resample, encode and write one output
//! - **Multipart** - Split a stream into one output per chapter
//!
//! ## Quick Start
//!
//! ```ignore
//! use frame_filters::filter::SilenceOptions;
//! use frame_filters::processor::{PipelineOptions, detect_silence};
//! use std::time::Duration;
//!
//! let silences = detect_silence(
//!     decoder,
//!     frames,
//!     SilenceOptions::new(-30.0, Duration::from_secs(2)),
//!     &PipelineOptions::default(),
//!     |found| println!("{}", found.silence),
//! )?;
//! ```

/// Core audio types and structures
pub mod core;
/// Compressed-audio decode sessions
pub mod decoder;
/// Encode sessions and output muxers
pub mod encoder;
/// Error types for audio operations
pub mod error;
/// Pipeline stages
pub mod filter;
/// Threaded stage runtime
pub mod pipeline;
/// Top-level operations
pub mod processor;

#[cfg(test)]
mod testing;

// Export public types
pub use core::{BufferTracker, ChapterEvent, ChapterQueue, Channels, FrameBuffer, FrameEntry, SampleFormat, WaveFormat};
pub use error::{AudioError, AudioResult};
pub use pipeline::{CancellationToken, Pipeline, PipelineBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
