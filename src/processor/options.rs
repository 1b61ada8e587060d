use crate::core::{Channels, WaveFormat, max_sample_rate};
use crate::error::{AudioError, AudioResult};
use crate::pipeline::CancellationToken;

/// Settings shared by every top-level operation
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Cancelling this token stops the run. A failed run never cancels it;
    /// stages observe a child token instead.
    pub cancel: CancellationToken,
    /// Queue capacity override for the decode stage
    pub decode_capacity: Option<usize>,
    /// Queue capacity override for intermediate transform stages
    pub transform_capacity: Option<usize>,
    /// Queue capacity override for the final stage
    pub sink_capacity: Option<usize>,
}

impl PipelineOptions {
    /// Default capacities, observing `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        PipelineOptions {
            cancel,
            ..Self::default()
        }
    }

    /// Set the decode stage's queue capacity
    pub fn with_decode_capacity(mut self, capacity: usize) -> Self {
        self.decode_capacity = Some(capacity);
        self
    }

    /// Set the queue capacity of transform stages after decode
    pub fn with_transform_capacity(mut self, capacity: usize) -> Self {
        self.transform_capacity = Some(capacity);
        self
    }

    /// Set the final stage's queue capacity
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = Some(capacity);
        self
    }

    /// Reject zero capacities before any stage starts
    pub fn validate(&self) -> AudioResult<()> {
        let capacities = [
            ("decode", self.decode_capacity),
            ("transform", self.transform_capacity),
            ("sink", self.sink_capacity),
        ];
        for (stage, capacity) in capacities {
            if capacity == Some(0) {
                return Err(AudioError::ConfigError(format!(
                    "The {} queue capacity must be at least 1",
                    stage
                )));
            }
        }
        Ok(())
    }
}

/// Requested shape of converted PCM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Output rate; capped at the source rate and at 96 kHz
    pub sample_rate: Option<u32>,
    /// Output channel layout; the source layout when unset
    pub channels: Option<Channels>,
}

impl OutputOptions {
    /// Keep the source format
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a sample rate
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    /// Request a channel layout
    pub fn with_channels(mut self, channels: Channels) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Rate and layout the output will have for a `source` stream
    pub fn resolve(&self, source: &WaveFormat) -> AudioResult<WaveFormat> {
        if self.sample_rate == Some(0) {
            return Err(AudioError::InvalidSampleRate { rate: 0 });
        }

        let rate = max_sample_rate(source.sample_rate(), self.sample_rate);
        let channels = self.channels.unwrap_or(source.channels());
        Ok(source.with_sample_rate(rate)?.with_channels(channels))
    }
}
