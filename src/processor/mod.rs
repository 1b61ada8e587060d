//! Top-level operations: wire a pipeline, feed it demuxed frames, and report
//! one terminal outcome.
//!
//! Every operation validates its arguments before any stage starts, so
//! configuration mistakes surface as [`AudioError::ConfigError`] (or a more
//! specific variant) rather than as a stage fault.

pub mod options;
pub mod wave_stream;

pub use options::{OutputOptions, PipelineOptions};
pub use wave_stream::{FrameSource, WaveStream};

use crate::core::{ChapterQueue, FrameEntry, WaveFormat};
use crate::decoder::Decoder;
use crate::encoder::{EncoderConfig, EncoderFactory, Muxer};
use crate::error::{AudioError, AudioResult};
use crate::filter::{
    DecodeFilter, FinalFilter, MultipartFilter, NewPartContext, Remix, Resample, SilenceDetectCallback,
    SilenceDetectFilter, SilenceEntry, SilenceOptions, SplitSummary, WriteSummary, WriterFilter,
};
use crate::pipeline::{Pipeline, PipelineBuilder};
use log::{debug, info, warn};

/// Find silences in a compressed track.
///
/// `frames` yields the track's compressed frames in order; an `Err` from it
/// aborts the run with that error. `on_silence` is called on the detection
/// stage's thread as each silence is found.
pub fn detect_silence<I, F>(
    decoder: Box<dyn Decoder>,
    frames: I,
    silence: SilenceOptions,
    pipeline: &PipelineOptions,
    on_silence: F,
) -> AudioResult<Vec<SilenceEntry>>
where
    I: IntoIterator<Item = AudioResult<FrameEntry>>,
    F: FnMut(&SilenceDetectCallback) + Send + 'static,
{
    pipeline.validate()?;
    let source = decoder.wave_format();
    let (builder, format) = decode_chain(decoder, pipeline, |format| {
        // The detector scans interleaved samples.
        let interleaved = format.sample_format().is_planar();
        Ok(ConversionPlan {
            remix_to: interleaved.then_some(format.channels()),
            resample_to: None,
        })
    })?;

    let detector = SilenceDetectFilter::new(silence, &format)?.with_callback(on_silence);
    info!(
        "Detecting silence in {} Hz {} audio",
        source.sample_rate(),
        source.channels().name()
    );
    run(finish(builder, detector, pipeline)?, frames)
}

/// Decode, convert and re-encode a track into a single output.
///
/// Chapters arriving on `chapters` are embedded in the output as they are
/// received.
#[allow(clippy::too_many_arguments)]
pub fn transcode<I, E>(
    decoder: Box<dyn Decoder>,
    frames: I,
    output: &OutputOptions,
    mut factory: E,
    config: &EncoderConfig,
    muxer: Box<dyn Muxer>,
    chapters: Option<ChapterQueue>,
    pipeline: &PipelineOptions,
) -> AudioResult<WriteSummary>
where
    I: IntoIterator<Item = AudioResult<FrameEntry>>,
    E: EncoderFactory,
{
    pipeline.validate()?;
    config.validate()?;
    let (builder, format) = decode_chain(decoder, pipeline, |format| ConversionPlan::for_output(format, output))?;

    let encoder = factory.open(&format, config)?;
    let builder = link(builder, crate::filter::EncodeFilter::new(encoder), pipeline);

    let mut writer = WriterFilter::new(muxer);
    if let Some(chapters) = chapters {
        writer = writer.with_chapters(chapters);
    }
    run(finish(builder, writer, pipeline)?, frames)
}

/// Decode and convert a track, encoding one output per chapter.
///
/// `new_part` is called each time a part starts; it returns the part's
/// destination and may change the encoder settings for that part and the
/// ones after it.
#[allow(clippy::too_many_arguments)]
pub fn transcode_multipart<I, E, C>(
    decoder: Box<dyn Decoder>,
    frames: I,
    output: &OutputOptions,
    factory: E,
    config: EncoderConfig,
    chapters: ChapterQueue,
    new_part: C,
    pipeline: &PipelineOptions,
) -> AudioResult<SplitSummary>
where
    I: IntoIterator<Item = AudioResult<FrameEntry>>,
    E: EncoderFactory + 'static,
    C: FnMut(&mut NewPartContext) -> AudioResult<Box<dyn Muxer>> + Send + 'static,
{
    pipeline.validate()?;
    let (builder, format) = decode_chain(decoder, pipeline, |format| ConversionPlan::for_output(format, output))?;

    let splitter = MultipartFilter::new(format, chapters, factory, new_part).with_encoder_config(config)?;
    run(finish(builder, splitter, pipeline)?, frames)
}

/// PCM conversions to insert after decode
struct ConversionPlan {
    remix_to: Option<crate::core::Channels>,
    resample_to: Option<u32>,
}

impl ConversionPlan {
    fn for_output(source: &WaveFormat, output: &OutputOptions) -> AudioResult<Self> {
        let target = output.resolve(source)?;
        let resample_to = (target.sample_rate() != source.sample_rate()).then_some(target.sample_rate());

        // Resampling needs interleaved input, so planar input is remixed first.
        let remix = target.channels() != source.channels()
            || (resample_to.is_some() && source.sample_format().is_planar());

        Ok(ConversionPlan {
            remix_to: remix.then_some(target.channels()),
            resample_to,
        })
    }
}

/// Link decode and any conversion stages, returning the PCM format they emit
fn decode_chain<P>(
    decoder: Box<dyn Decoder>,
    pipeline: &PipelineOptions,
    plan: P,
) -> AudioResult<(PipelineBuilder, WaveFormat)>
where
    P: FnOnce(&WaveFormat) -> AudioResult<ConversionPlan>,
{
    let decode = DecodeFilter::new(decoder);
    let mut format = decode.wave_format();
    let plan = plan(&format)?;

    let mut builder = PipelineBuilder::new(pipeline.cancel.clone());
    builder = match pipeline.decode_capacity {
        Some(capacity) => builder.link_with_capacity(decode, capacity),
        None => builder.link_to(decode),
    };

    if let Some(channels) = plan.remix_to {
        let remix = Remix::new(format, channels)?;
        debug!("Remixing {} to {}", format.channels().name(), channels.name());
        format = remix.output_format();
        builder = link(builder, remix, pipeline);
    }

    if let Some(rate) = plan.resample_to {
        let resample = Resample::new(format, rate)?;
        format = resample.output_format();
        builder = link(builder, resample, pipeline);
    }

    Ok((builder, format))
}

fn link<T: crate::filter::TransformFilter>(
    builder: PipelineBuilder,
    filter: T,
    pipeline: &PipelineOptions,
) -> PipelineBuilder {
    match pipeline.transform_capacity {
        Some(capacity) => builder.link_with_capacity(filter, capacity),
        None => builder.link_to(filter),
    }
}

fn finish<F: FinalFilter>(
    builder: PipelineBuilder,
    filter: F,
    pipeline: &PipelineOptions,
) -> AudioResult<Pipeline<F::Output>> {
    match pipeline.sink_capacity {
        Some(capacity) => builder.finish_with_capacity(filter, capacity),
        None => builder.finish(filter),
    }
}

/// Feed every frame, then wait for the pipeline's outcome
fn run<O, I>(pipeline: Pipeline<O>, frames: I) -> AudioResult<O>
where
    I: IntoIterator<Item = AudioResult<FrameEntry>>,
{
    let mut submitted = 0u64;
    for frame in frames {
        let entry = match frame {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Frame source failed after {} frames: {}", submitted, e);
                pipeline.cancel();
                // The source error takes precedence over the cancellation outcome.
                let _ = pipeline.complete();
                return Err(e);
            }
        };

        match pipeline.submit(entry) {
            Ok(()) => submitted += 1,
            Err(AudioError::Cancelled) => {
                debug!("Pipeline stopped accepting frames after {}", submitted);
                break;
            }
            Err(e) => return Err(e),
        }
    }

    debug!("Fed {} frames", submitted);
    pipeline.complete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{BufferTracker, ChapterEvent, Channels, SampleFormat};
    use crate::encoder::{Encoder, PcmEncoder, WavMuxer};
    use crate::pipeline::CancellationToken;
    use crate::testing::{FakeDecoder, RecordingMuxer, init_logging};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Compressed frames whose first byte picks the decoded level
    fn frames(
        tracker: &BufferTracker,
        markers: &[u8],
    ) -> impl Iterator<Item = AudioResult<FrameEntry>> + use<> {
        let tracker = tracker.clone();
        markers
            .to_vec()
            .into_iter()
            .enumerate()
            .map(move |(i, marker)| Ok(FrameEntry::new(tracker.alloc(vec![marker]), 0, i as u64)))
    }

    fn pcm_factory(format: &WaveFormat, _: &EncoderConfig) -> AudioResult<Box<dyn Encoder>> {
        Ok(Box::new(PcmEncoder::new(*format)))
    }

    #[test]
    fn test_detect_silence_end_to_end() {
        init_logging();
        let tracker = BufferTracker::new();
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let decoder = FakeDecoder::new(format, 100);
        let seen = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&seen);

        let silences = detect_silence(
            Box::new(decoder),
            frames(&tracker, &[10, 10, 0, 0, 0, 10, 0, 10]),
            SilenceOptions::new(-40.0, Duration::from_millis(50)),
            &PipelineOptions::default(),
            move |_| *counter.lock().unwrap() += 1,
        )
        .unwrap();

        assert_eq!(silences.len(), 2);
        assert_eq!(silences[0].start(), Duration::from_secs_f64(0.2));
        assert_eq!(silences[0].end(), Duration::from_secs_f64(0.5));
        assert_eq!(silences[1].start(), Duration::from_secs_f64(0.6));
        assert_eq!(*seen.lock().unwrap(), 2);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_detect_silence_on_planar_stereo() {
        let tracker = BufferTracker::new();
        let format = WaveFormat::new(1000, Channels::Stereo, SampleFormat::Planar16).unwrap();
        let silences = detect_silence(
            Box::new(FakeDecoder::new(format, 100)),
            frames(&tracker, &[10, 0, 0, 10]),
            SilenceOptions::new(-40.0, Duration::from_millis(50)),
            &PipelineOptions::default(),
            |_| {},
        )
        .unwrap();

        assert_eq!(silences.len(), 1);
        assert_eq!(silences[0].start(), Duration::from_secs_f64(0.1));
        assert_eq!(silences[0].end(), Duration::from_secs_f64(0.3));
    }

    #[test]
    fn test_invalid_silence_options_fail_before_start() {
        let tracker = BufferTracker::new();
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let result = detect_silence(
            Box::new(FakeDecoder::new(format, 100)),
            frames(&tracker, &[0]),
            SilenceOptions::new(5.0, Duration::from_millis(50)),
            &PipelineOptions::default(),
            |_| {},
        );
        assert!(matches!(result, Err(AudioError::ConfigError(_))));
    }

    #[test]
    fn test_source_error_is_returned() {
        let tracker = BufferTracker::new();
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let source = frames(&tracker, &[10, 10])
            .chain(std::iter::once(Err(AudioError::DecodeError("truncated chunk".to_string()))));
        let cancel = CancellationToken::new();

        let result = detect_silence(
            Box::new(FakeDecoder::new(format, 100)),
            source,
            SilenceOptions::new(-40.0, Duration::from_millis(50)),
            &PipelineOptions::new(cancel.clone()),
            |_| {},
        );
        assert!(matches!(result, Err(AudioError::DecodeError(_))));
        assert!(!cancel.is_cancelled());
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_cancelled_run_reports_cancelled() {
        let tracker = BufferTracker::new();
        let format = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = detect_silence(
            Box::new(FakeDecoder::new(format, 100)),
            frames(&tracker, &[0; 50]),
            SilenceOptions::new(-40.0, Duration::from_millis(50)),
            &PipelineOptions::new(cancel),
            |_| {},
        );
        assert!(matches!(result, Err(AudioError::Cancelled)));
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_transcode_to_wav_with_downmix_and_resample() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let tracker = BufferTracker::new();
        let source = WaveFormat::pcm16(48000, Channels::Stereo).unwrap();
        let output = OutputOptions::new().with_sample_rate(24000).with_channels(Channels::Mono);
        let target = output.resolve(&source).unwrap();

        let summary = transcode(
            Box::new(FakeDecoder::new(source, 1024)),
            frames(&tracker, &[0; 10]),
            &output,
            pcm_factory,
            &EncoderConfig::default(),
            Box::new(WavMuxer::create(&path, target).unwrap()),
            None,
            &PipelineOptions::default().with_transform_capacity(4),
        )
        .unwrap();

        assert_eq!(summary.samples_written, 5120);
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 5120);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_transcode_embeds_chapters() {
        let tracker = BufferTracker::new();
        let source = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let muxer = RecordingMuxer::new();
        let chapters = ChapterQueue::from_chapters(vec![
            ChapterEvent::new(Duration::ZERO, Duration::from_millis(200), "Intro").unwrap(),
        ])
        .unwrap();

        let summary = transcode(
            Box::new(FakeDecoder::new(source, 100)),
            frames(&tracker, &[1, 2]),
            &OutputOptions::new(),
            pcm_factory,
            &EncoderConfig::default(),
            Box::new(muxer.clone()),
            Some(chapters),
            &PipelineOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.frames_written, 2);
        assert_eq!(summary.chapters_written, 1);
        assert_eq!(muxer.closed(), 1);
    }

    #[test]
    fn test_decode_fault_leaves_output_unfinished() {
        let tracker = BufferTracker::new();
        let source = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let muxer = RecordingMuxer::new();
        let cancel = CancellationToken::new();

        let result = transcode(
            Box::new(FakeDecoder::new(source, 100).rejecting(0xEE)),
            frames(&tracker, &[1, 2, 0xEE, 3, 4]),
            &OutputOptions::new(),
            pcm_factory,
            &EncoderConfig::default(),
            Box::new(muxer.clone()),
            None,
            &PipelineOptions::new(cancel.clone()),
        );

        match result {
            Err(AudioError::Faulted { stage, .. }) => assert_eq!(stage, "decode"),
            other => panic!("expected a decode fault, got {:?}", other),
        }
        assert!(!cancel.is_cancelled());
        assert_eq!(muxer.closed(), 0);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn test_skip_budget_keeps_stream_going() {
        let tracker = BufferTracker::new();
        let source = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let muxer = RecordingMuxer::new();

        let summary = transcode(
            Box::new(FakeDecoder::new(source, 100).rejecting(0xEE).with_skip_budget(1000)),
            frames(&tracker, &[1, 0xEE, 2]),
            &OutputOptions::new(),
            pcm_factory,
            &EncoderConfig::default(),
            Box::new(muxer.clone()),
            None,
            &PipelineOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.frames_written, 2);
        assert_eq!(muxer.frame_count(), 2);
    }

    #[test]
    fn test_transcode_multipart_to_wav_files() {
        let dir = TempDir::new().unwrap();
        let tracker = BufferTracker::new();
        let source = WaveFormat::pcm16(1000, Channels::Mono).unwrap();
        let chapters = ChapterQueue::from_chapters(vec![
            ChapterEvent::new(Duration::ZERO, Duration::from_millis(300), "One").unwrap(),
            ChapterEvent::new(Duration::from_millis(300), Duration::from_millis(800), "Two").unwrap(),
        ])
        .unwrap();

        let base = dir.path().to_path_buf();
        let summary = transcode_multipart(
            Box::new(FakeDecoder::new(source, 100)),
            frames(&tracker, &[1; 8]),
            &OutputOptions::new(),
            pcm_factory,
            EncoderConfig::default(),
            chapters,
            move |context: &mut NewPartContext| {
                let path = base.join(format!("part{}.wav", context.part_number()));
                Ok(Box::new(WavMuxer::create(path, source)?) as Box<dyn Muxer>)
            },
            &PipelineOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.parts.len(), 2);
        let lengths: Vec<u32> = (1..=2)
            .map(|n| {
                hound::WavReader::open(dir.path().join(format!("part{}.wav", n)))
                    .unwrap()
                    .len()
            })
            .collect();
        assert_eq!(lengths, vec![300, 500]);
        assert_eq!(tracker.live(), 0);
    }
}
