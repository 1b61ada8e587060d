//! Frame filters: the per-stage processing hooks run by the pipeline

pub mod decode;
pub mod encode;
pub mod multipart;
pub mod remix;
pub mod resample;
pub mod silence;
pub mod writer;

pub use decode::DecodeFilter;
pub use encode::EncodeFilter;
pub use multipart::{MultipartFilter, NewPartContext, PartSummary, SplitSummary};
pub use remix::Remix;
pub use resample::Resample;
pub use silence::{SilenceDetectCallback, SilenceDetectFilter, SilenceEntry, SilenceOptions};
pub use writer::{WriteSummary, WriterFilter};

use crate::core::FrameEntry;
use crate::error::AudioResult;

/// Default input queue capacity for a stage
pub const DEFAULT_QUEUE_CAPACITY: usize = 300;

/// A stage that turns each input entry into zero or more output entries
pub trait TransformFilter: Send + 'static {
    /// Stage name used in logs and fault reports
    fn name(&self) -> &str;

    /// Capacity of this stage's input queue
    fn queue_capacity(&self) -> usize {
        DEFAULT_QUEUE_CAPACITY
    }

    /// Process one entry, taking ownership of its buffers
    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>>;

    /// Emit any trailing entries once upstream is exhausted
    fn flush(&mut self) -> AudioResult<Vec<FrameEntry>> {
        Ok(Vec::new())
    }
}

/// A terminal stage with side effects only
pub trait FinalFilter: Send + 'static {
    /// Result handed back once the stage completed
    type Output: Send + 'static;

    /// Stage name used in logs and fault reports
    fn name(&self) -> &str;

    /// Capacity of this stage's input queue
    fn queue_capacity(&self) -> usize {
        DEFAULT_QUEUE_CAPACITY
    }

    /// Consume one entry
    fn process(&mut self, entry: FrameEntry) -> AudioResult<()>;

    /// Finish the stream: close writers, report trailing results
    fn flush(&mut self) -> AudioResult<()>;

    /// Take the accumulated result after a successful flush
    fn into_output(self) -> Self::Output;
}

impl TransformFilter for Box<dyn TransformFilter> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn queue_capacity(&self) -> usize {
        (**self).queue_capacity()
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<Vec<FrameEntry>> {
        (**self).process(entry)
    }

    fn flush(&mut self) -> AudioResult<Vec<FrameEntry>> {
        (**self).flush()
    }
}
