//! Builds a pipeline from a [`TranscodeConfig`].
//!
//! Chains per output stream:
//!
//! ```text
//! audio: decoder -> resampler/fifo -> encoder -> timestamper -> scaler -> muxer
//! video: decoder -> [rate limiter] -> [rescaler] -> encoder -> scaler -> muxer
//! copy:  scaler (re-addressed) -> muxer
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::{Consumer, FnConsumer, Producer, Shared};
use crate::config::{AudioOutputConfig, TranscodeConfig, VideoOutputConfig};
use crate::decode::Decoder;
use crate::demux::Demuxer;
use crate::encode::Encoder;
use crate::engine::{EngineOptions, MediaEngine};
use crate::error::{Result, TranscodeError};
use crate::io::{InputAdapter, OutputAdapter};
use crate::media::{CodecParameters, Frame, MediaKind, MediaParameters, StreamDescriptor};
use crate::mux::Muxer;
use crate::observability::{FRAMES_DECODED, MetricsCollector};
use crate::pipeline::{Pipeline, PipelineSummary};
use crate::time::Rational;
use crate::timestamp::{AudioTimestamper, TimestampScaler};
use crate::transform::{AudioResampler, RateLimiter, VideoRescaler};

/// Lists the streams of an input without transcoding it.
pub fn probe(engine: &dyn MediaEngine, input: InputAdapter) -> Result<Vec<StreamDescriptor>> {
    let (streams, mut demuxer) = Demuxer::open(engine, input, None)?;
    demuxer.close();
    Ok(streams)
}

pub struct Transcoder {
    engine: Arc<dyn MediaEngine>,
    config: TranscodeConfig,
    metrics: MetricsCollector,
}

impl Transcoder {
    pub fn new(engine: Arc<dyn MediaEngine>, config: TranscodeConfig) -> Self {
        Self {
            engine,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Transcodes `reader` into `writer` to completion.
    pub fn transcode<R, W>(&self, reader: R, writer: W) -> Result<PipelineSummary>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let input = if self.config.threaded_input {
            InputAdapter::threaded(reader, self.config.buffer_size)?
        } else {
            InputAdapter::from_reader(reader)
        };
        self.run(input, OutputAdapter::new(writer))
    }

    pub fn run(&self, input: InputAdapter, output: OutputAdapter) -> Result<PipelineSummary> {
        self.build(input, output)?.run()
    }

    /// Opens both containers and wires every configured output stream.
    pub fn build(&self, input: InputAdapter, output: OutputAdapter) -> Result<Pipeline> {
        let engine = self.engine.as_ref();
        let buffer_size = self.config.buffer_size;
        let (_, demuxer) = Demuxer::open_with_buffer(engine, input, None, buffer_size)?;
        let format = engine.guess_output_format(&self.config.container_format)?;
        let muxer = Shared::new(Muxer::open_with_buffer(
            engine,
            output,
            &format,
            self.config.muxer_options.clone(),
            buffer_size,
        )?);
        let mut pipeline = Pipeline::new(demuxer, muxer.clone()).with_metrics(self.metrics.clone());

        if let Some(audio) = &self.config.audio
            && let Some(stream) =
                select_stream(pipeline.demuxer(), MediaKind::Audio, audio.source_stream)?.cloned()
        {
            if audio.copy {
                self.wire_copy(&mut pipeline, &muxer, &stream)?;
            } else {
                self.wire_audio(&mut pipeline, &muxer, &stream, audio)?;
            }
        }
        if let Some(video) = &self.config.video
            && let Some(stream) =
                select_stream(pipeline.demuxer(), MediaKind::Video, video.source_stream)?.cloned()
        {
            if video.copy {
                self.wire_copy(&mut pipeline, &muxer, &stream)?;
            } else {
                self.wire_video(&mut pipeline, &muxer, &stream, video)?;
            }
        }

        if pipeline.routed_streams().is_empty() {
            return Err(TranscodeError::invalid_state(
                "no output stream could be configured for this input",
            ));
        }
        info!(
            routes = ?pipeline.routed_streams(),
            format = format.name.as_str(),
            "Pipeline wired"
        );
        Ok(pipeline)
    }

    fn wire_copy(
        &self,
        pipeline: &mut Pipeline,
        muxer: &Shared<Muxer>,
        stream: &StreamDescriptor,
    ) -> Result<()> {
        let handle = muxer.lock()?.add_stream(&stream.parameters)?;
        let mut scaler = TimestampScaler::new(stream.time_base(), handle.time_base())
            .with_stream_index(handle.index);
        scaler.connect(muxer.clone());
        pipeline.route(stream.index, scaler);
        info!(input = stream.index, output = handle.index, "Stream copy");
        Ok(())
    }

    fn wire_audio(
        &self,
        pipeline: &mut Pipeline,
        muxer: &Shared<Muxer>,
        stream: &StreamDescriptor,
        config: &AudioOutputConfig,
    ) -> Result<()> {
        let engine = self.engine.as_ref();
        let input = stream
            .audio()
            .ok_or_else(|| TranscodeError::invalid_state("audio stream without parameters"))?;
        let target = config.resolve(input)?;
        let parameters = CodecParameters {
            codec_name: config
                .codec
                .clone()
                .unwrap_or_else(|| stream.codec_name().to_string()),
            bit_rate: config.bit_rate,
            time_base: Rational::new(0, 1),
            media: MediaParameters::Audio(target),
        };

        let mut decoder = Decoder::open(engine, stream, &EngineOptions::new())?;
        let mut encoder = {
            let mut guard = muxer.lock()?;
            Encoder::open(engine, &parameters, &config.options, &mut guard)?
        };
        let encoded = encoder
            .parameters()
            .audio()
            .cloned()
            .ok_or_else(|| TranscodeError::invalid_state("audio encoder lost its parameters"))?;
        let mut resampler = AudioResampler::open(engine, input, &encoded, encoder.frame_size())?;

        let mut scaler = TimestampScaler::new(encoder.time_base(), encoder.stream().time_base());
        scaler.connect(muxer.clone());
        let mut stamper = AudioTimestamper::new();
        stamper.connect(scaler);
        encoder.connect(stamper);
        resampler.connect(encoder);
        decoder.outlet().connect_boxed(self.frame_counter(FRAMES_DECODED));
        decoder.connect(resampler);
        pipeline.route(stream.index, decoder);
        Ok(())
    }

    fn wire_video(
        &self,
        pipeline: &mut Pipeline,
        muxer: &Shared<Muxer>,
        stream: &StreamDescriptor,
        config: &VideoOutputConfig,
    ) -> Result<()> {
        let engine = self.engine.as_ref();
        let input = stream
            .video()
            .ok_or_else(|| TranscodeError::invalid_state("video stream without parameters"))?;
        let target = config.resolve(input);
        // Frames keep the input time base all the way to the encoder.
        let parameters = CodecParameters {
            codec_name: config
                .codec
                .clone()
                .unwrap_or_else(|| stream.codec_name().to_string()),
            bit_rate: config.bit_rate,
            time_base: stream.time_base(),
            media: MediaParameters::Video(target.clone()),
        };

        let mut decoder = Decoder::open(engine, stream, &EngineOptions::new())?;
        let mut encoder = {
            let mut guard = muxer.lock()?;
            Encoder::open(engine, &parameters, &config.options, &mut guard)?
        };
        let mut scaler = TimestampScaler::new(encoder.time_base(), encoder.stream().time_base());
        scaler.connect(muxer.clone());
        encoder.connect(scaler);

        let mut head: Box<dyn Consumer<Frame>> = Box::new(encoder);
        let geometry_changes = target.width != input.width
            || target.height != input.height
            || target.pixel_format != input.pixel_format;
        if geometry_changes {
            let mut rescaler =
                VideoRescaler::open(engine, input, &target, config.interpolation_method)?;
            rescaler.outlet().connect_boxed(head);
            head = Box::new(rescaler);
        }
        if RateLimiter::needed(input.frame_rate, target.frame_rate) {
            let mut limiter =
                RateLimiter::new(input.frame_rate, target.frame_rate, stream.time_base())?
                    .with_metrics(self.metrics.clone());
            limiter.outlet().connect_boxed(head);
            head = Box::new(limiter);
        }
        decoder.outlet().connect_boxed(self.frame_counter(FRAMES_DECODED));
        decoder.outlet().connect_boxed(head);
        pipeline.route(stream.index, decoder);
        Ok(())
    }

    fn frame_counter(&self, counter: &'static str) -> Box<dyn Consumer<Frame>> {
        let metrics = self.metrics.clone();
        Box::new(FnConsumer(move |_: &Frame| -> Result<()> {
            metrics.increment(counter, 1);
            Ok(())
        }))
    }
}

/// Picks the stream for an output section: the explicit index when given,
/// otherwise the first stream of `kind`.
/// An explicit `source` must exist and be of `kind`; otherwise the demuxer's
/// best stream of that kind, if any.
fn select_stream(
    demuxer: &Demuxer,
    kind: MediaKind,
    source: Option<usize>,
) -> Result<Option<&StreamDescriptor>> {
    match source {
        Some(index) => {
            let stream = demuxer.stream(index).ok_or_else(|| {
                TranscodeError::invalid_state(format!("input has no stream {index}"))
            })?;
            if stream.kind() != kind {
                return Err(TranscodeError::invalid_state(format!(
                    "input stream {index} is {:?}, not {kind:?}",
                    stream.kind()
                )));
            }
            Ok(Some(stream))
        }
        None => {
            let found = demuxer.best_stream(kind);
            if found.is_none() {
                warn!(?kind, "input has no such stream, output section skipped");
            }
            Ok(found)
        }
    }
}
