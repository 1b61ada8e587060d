//! Silence detection over interleaved 16-bit PCM.
//!
//! Samples are classified a lane of [`LANE_WIDTH`] values at a time. Each lane
//! is reduced to a bit mask with a branch-free loop the compiler vectorizes;
//! all-loud and all-silent lanes take a fast path, and only mixed lanes are
//! walked sample by sample to find exact run boundaries.

use super::FinalFilter;
use crate::core::{FrameEntry, SampleFormat, WaveFormat};
use crate::error::{AudioError, AudioResult};
use log::{debug, info};
use std::fmt;
use std::time::Duration;

/// Samples classified per lane
pub const LANE_WIDTH: usize = 16;

/// Queue capacity of the silence detection stage
pub const SILENCE_QUEUE_CAPACITY: usize = 500;

const ALL_SILENT: u16 = u16::MAX;
const ALL_LOUD: u16 = 0;

/// Silence detection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceOptions {
    threshold_db: f64,
    min_duration: Duration,
}

impl SilenceOptions {
    /// Detect runs quieter than `threshold_db` lasting longer than `min_duration`
    pub fn new(threshold_db: f64, min_duration: Duration) -> Self {
        SilenceOptions {
            threshold_db,
            min_duration,
        }
    }

    /// Silence threshold in dBFS
    pub fn threshold_db(&self) -> f64 {
        self.threshold_db
    }

    /// Shortest reported silence
    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    /// Check the parameters against the stream they will scan
    pub fn validate(&self, format: &WaveFormat) -> AudioResult<()> {
        if !(-90.0..0.0).contains(&self.threshold_db) {
            return Err(AudioError::ConfigError(format!(
                "Silence threshold must be in [-90, 0) dB, got {}",
                self.threshold_db
            )));
        }

        if self.min_duration.as_secs_f64() * (format.sample_rate() as f64) < 2.0 {
            return Err(AudioError::ConfigError(format!(
                "Minimum silence duration {:?} spans fewer than 2 samples at {} Hz",
                self.min_duration,
                format.sample_rate()
            )));
        }

        if format.sample_format() != SampleFormat::Pcm16 {
            return Err(AudioError::UnsupportedFormat(format!(
                "Silence detection needs interleaved 16-bit PCM, got {:?}",
                format.sample_format()
            )));
        }

        Ok(())
    }

    /// Magnitude at or above which a sample counts as loud
    pub fn max_amplitude(&self) -> i16 {
        (10f64.powf(self.threshold_db / 20.0) * i16::MAX as f64).round() as i16
    }

    /// Interleaved samples a run must exceed to be reported.
    ///
    /// Counts samples of every channel, so stereo needs twice as many as mono
    /// for the same duration.
    pub fn min_run_samples(&self, format: &WaveFormat) -> u64 {
        (format.sample_rate() as f64 * self.min_duration.as_secs_f64() * format.channels().count() as f64).round()
            as u64
    }
}

/// One detected silence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceEntry {
    start: Duration,
    end: Duration,
}

impl SilenceEntry {
    fn new(start: Duration, end: Duration) -> Self {
        SilenceEntry { start, end }
    }

    /// Offset of the first silent sample
    pub fn start(&self) -> Duration {
        self.start
    }

    /// Offset just past the last silent sample
    pub fn end(&self) -> Duration {
        self.end
    }

    /// Length of the silence
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

fn write_timestamp(f: &mut fmt::Formatter<'_>, offset: Duration) -> fmt::Result {
    let millis = offset.as_millis();
    write!(
        f,
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

impl fmt::Display for SilenceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Start = ")?;
        write_timestamp(f, self.start)?;
        write!(f, ", End = ")?;
        write_timestamp(f, self.end)?;
        write!(f, ", Duration = {:.3} s]", self.duration().as_secs_f64())
    }
}

/// Payload handed to the detection callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceDetectCallback {
    /// Threshold the silence was detected with, in dBFS
    pub threshold_db: f64,
    /// Minimum duration the silence was detected with
    pub min_duration: Duration,
    /// The detected silence
    pub silence: SilenceEntry,
}

/// Run-length silence classifier over a continuous interleaved sample stream
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    max_amplitude: i16,
    min_run_samples: u64,
    channels: u64,
    sample_rate: u64,
    current_sample: u64,
    run_start: u64,
    run_length: u64,
}

impl SilenceDetector {
    /// Create a detector for `format`
    pub fn new(options: &SilenceOptions, format: &WaveFormat) -> AudioResult<Self> {
        options.validate(format)?;
        Ok(SilenceDetector {
            max_amplitude: options.max_amplitude(),
            min_run_samples: options.min_run_samples(format),
            channels: format.channels().count() as u64,
            sample_rate: format.sample_rate() as u64,
            current_sample: 0,
            run_start: 0,
            run_length: 0,
        })
    }

    /// Bit `j` is set when `lane[j]` is strictly inside the silence band
    #[inline]
    fn lane_mask(&self, lane: &[i16]) -> u16 {
        let max = self.max_amplitude;
        lane.iter()
            .enumerate()
            .fold(0u16, |mask, (j, &s)| mask | (((s > -max) & (s < max)) as u16) << j)
    }

    fn silent_sample(&mut self, position: u64) {
        if self.run_length == 0 {
            self.run_start = position;
        }
        self.run_length += 1;
    }

    fn loud_sample(&mut self, found: &mut Vec<SilenceEntry>) {
        if self.run_length != 0 {
            self.close_run(found);
        }
    }

    fn close_run(&mut self, found: &mut Vec<SilenceEntry>) {
        if self.run_length > self.min_run_samples {
            let per_second = (self.channels * self.sample_rate) as f64;
            let start = Duration::from_secs_f64(self.run_start as f64 / per_second);
            let end = Duration::from_secs_f64((self.run_start + self.run_length) as f64 / per_second);
            found.push(SilenceEntry::new(start, end));
        }
        self.run_length = 0;
    }

    /// Scan the next stretch of samples, appending completed silences to `found`
    pub fn scan(&mut self, samples: &[i16], found: &mut Vec<SilenceEntry>) {
        let lanes = samples.chunks_exact(LANE_WIDTH);
        let tail = lanes.remainder();

        for lane in lanes {
            match self.lane_mask(lane) {
                ALL_SILENT => {
                    if self.run_length == 0 {
                        self.run_start = self.current_sample;
                    }
                    self.run_length += LANE_WIDTH as u64;
                }
                ALL_LOUD => self.loud_sample(found),
                mask => {
                    for j in 0..LANE_WIDTH {
                        if mask & (1 << j) != 0 {
                            self.silent_sample(self.current_sample + j as u64);
                        } else {
                            self.loud_sample(found);
                        }
                    }
                }
            }
            self.current_sample += LANE_WIDTH as u64;
        }

        for &s in tail {
            if s > -self.max_amplitude && s < self.max_amplitude {
                self.silent_sample(self.current_sample);
            } else {
                self.loud_sample(found);
            }
            self.current_sample += 1;
        }
    }

    /// Close a run still open at end of stream
    pub fn finish(&mut self, found: &mut Vec<SilenceEntry>) {
        self.close_run(found);
    }
}

/// Invoked synchronously for every detected silence
pub type DetectionCallback = Box<dyn FnMut(&SilenceDetectCallback) + Send>;

/// Final stage collecting silences from decoded PCM
pub struct SilenceDetectFilter {
    options: SilenceOptions,
    detector: SilenceDetector,
    silences: Vec<SilenceEntry>,
    callback: Option<DetectionCallback>,
    scratch: Vec<i16>,
}

impl SilenceDetectFilter {
    /// Create a detection stage for `format`
    pub fn new(options: SilenceOptions, format: &WaveFormat) -> AudioResult<Self> {
        let detector = SilenceDetector::new(&options, format)?;
        debug!(
            "Detecting silence below {} dB ({} amplitude) longer than {:?}",
            options.threshold_db(),
            detector.max_amplitude,
            options.min_duration()
        );

        Ok(SilenceDetectFilter {
            options,
            detector,
            silences: Vec::new(),
            callback: None,
            scratch: Vec::new(),
        })
    }

    /// Call `callback` as each silence is detected
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&SilenceDetectCallback) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Silences detected so far
    pub fn silences(&self) -> &[SilenceEntry] {
        &self.silences
    }

    fn report(&mut self, found: usize) {
        for silence in &self.silences[found..] {
            info!("Silence detected: {}", silence);
            if let Some(callback) = self.callback.as_mut() {
                callback(&SilenceDetectCallback {
                    threshold_db: self.options.threshold_db(),
                    min_duration: self.options.min_duration(),
                    silence: *silence,
                });
            }
        }
    }
}

impl FinalFilter for SilenceDetectFilter {
    type Output = Vec<SilenceEntry>;

    fn name(&self) -> &str {
        "silence"
    }

    fn queue_capacity(&self) -> usize {
        SILENCE_QUEUE_CAPACITY
    }

    fn process(&mut self, entry: FrameEntry) -> AudioResult<()> {
        let samples = entry.sample_count as usize * self.detector.channels as usize;
        let bytes = entry.payload.as_slice();
        if bytes.len() < samples * 2 {
            return Err(AudioError::BufferError(format!(
                "Frame {} holds {} bytes, expected {}",
                entry.frame_index,
                bytes.len(),
                samples * 2
            )));
        }

        self.scratch.clear();
        self.scratch.extend(
            bytes[..samples * 2]
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]])),
        );

        let found = self.silences.len();
        self.detector.scan(&self.scratch, &mut self.silences);
        self.report(found);
        Ok(())
    }

    fn flush(&mut self) -> AudioResult<()> {
        let found = self.silences.len();
        self.detector.finish(&mut self.silences);
        self.report(found);
        Ok(())
    }

    fn into_output(self) -> Vec<SilenceEntry> {
        self.silences
    }
}
