use std::io;
use thiserror::Error;

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Error types for the frame filter pipeline
#[derive(Error, Debug)]
pub enum AudioError {
    /// IO error (file operations, disk access)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported audio format
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// The codec rejected a frame but may recover on later frames
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Decoding failed
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Encoding failed
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// Invalid channel configuration
    #[error("Invalid channel configuration: expected {expected}, got {got}")]
    InvalidChannels {
        /// Expected number of channels
        expected: u32,
        /// Got number of channels
        got: u32,
    },

    /// Invalid sample rate
    #[error("Invalid sample rate: {rate}")]
    InvalidSampleRate {
        /// The invalid sample rate
        rate: u32,
    },

    /// Buffer-related error
    #[error("Buffer error: {0}")]
    BufferError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A chapter event arrived out of chapter order
    #[error("Chapter out of order: {0}")]
    ChapterOrder(String),

    /// A stage hook panicked
    #[error("Stage panicked: {0}")]
    StagePanic(String),

    /// The pipeline was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

    /// A pipeline stage failed while processing or flushing
    #[error("Stage '{stage}' faulted: {source}")]
    Faulted {
        /// Name of the stage that failed first
        stage: String,
        /// The error raised by that stage
        #[source]
        source: Box<AudioError>,
    },
}

impl AudioError {
    /// True for the cooperative cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AudioError::Cancelled)
    }
}

impl From<symphonia::core::errors::Error> for AudioError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        match err {
            symphonia::core::errors::Error::DecodeError(msg) => {
                AudioError::InvalidFrame(msg.to_string())
            }
            symphonia::core::errors::Error::IoError(e) => AudioError::Io(e),
            symphonia::core::errors::Error::Unsupported(what) => {
                AudioError::UnsupportedFormat(what.to_string())
            }
            e => AudioError::DecodeError(e.to_string()),
        }
    }
}

impl From<hound::Error> for AudioError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => AudioError::Io(e),
            e => AudioError::EncodeError(e.to_string()),
        }
    }
}
