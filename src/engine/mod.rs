//! Interface to the codec/container engine.
//!
//! The pipeline only talks to these traits. [`native::NativeEngine`] is the
//! built-in implementation; other engines can be plugged in by implementing
//! [`MediaEngine`].

pub mod native;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::io::{InputAdapter, OutputAdapter};
use crate::media::{
    AudioParameters, AudioSamples, CodecParameters, FormatFlags, Frame, Interpolation, MediaKind,
    Packet, Picture, StreamDescriptor, VideoParameters,
};
use crate::time::Rational;

/// Opaque key/value options forwarded to the engine.
pub type EngineOptions = BTreeMap<String, String>;

/// An output container format the engine can write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFormat {
    pub name: String,
    pub mime_type: String,
    pub extension: String,
    pub flags: FormatFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodecInfo {
    pub name: String,
    pub kind: MediaKind,
    pub description: String,
}

/// A container being read.
pub trait InputContainer: Send {
    fn streams(&self) -> &[StreamDescriptor];

    /// Next packet in the container's own interleaving order, `None` at the
    /// end of the input.
    fn read_packet(&mut self) -> Result<Option<Packet>>;
}

/// A container being written.
pub trait OutputContainer: Send {
    fn format(&self) -> &OutputFormat;

    /// Declares a stream and returns the parameters the container will use,
    /// which may differ from the request (for example a coarser timebase).
    fn add_stream(&mut self, parameters: &CodecParameters) -> Result<CodecParameters>;

    fn write_header(&mut self, options: &EngineOptions) -> Result<()>;

    /// Queues a packet for interleaved output.
    fn write_packet(&mut self, packet: &Packet) -> Result<()>;

    /// Flushes queued packets, writes the trailer and flushes the sink.
    fn write_trailer(&mut self) -> Result<()>;
}

/// Receive-side result shared by decoders and encoders.
#[derive(Debug)]
pub enum Received<T> {
    Item(T),
    /// More input is needed before anything can come out.
    Again,
    /// Fully drained after end of stream was signalled.
    Eof,
}

pub trait PacketDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;
    fn send_eof(&mut self) -> Result<()>;
    fn receive_frame(&mut self) -> Result<Received<Frame>>;
}

pub trait FrameEncoder: Send {
    /// Effective parameters, including time base and frame size.
    fn parameters(&self) -> &CodecParameters;
    fn send_frame(&mut self, frame: &Frame) -> Result<()>;
    fn send_eof(&mut self) -> Result<()>;
    fn receive_packet(&mut self) -> Result<Received<Packet>>;
}

/// Sample format and channel layout conversion at a fixed sample rate.
pub trait SampleConverter: Send {
    fn convert(&mut self, input: &AudioSamples) -> Result<AudioSamples>;
}

/// Pixel format and resolution conversion into a caller-owned picture.
pub trait PictureScaler: Send {
    fn scale(&mut self, input: &Picture, output: &mut Picture) -> Result<()>;
}

/// Factory for every engine-side object the pipeline needs.
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_input(
        &self,
        input: InputAdapter,
        format_hint: Option<&str>,
        buffer_size: usize,
    ) -> Result<Box<dyn InputContainer>>;

    /// Resolves an output format from a short name, MIME type or file
    /// extension.
    fn guess_output_format(&self, name_or_mime: &str) -> Result<OutputFormat>;

    fn open_output(
        &self,
        output: OutputAdapter,
        format: &OutputFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputContainer>>;

    fn open_decoder(
        &self,
        stream: &StreamDescriptor,
        options: &EngineOptions,
    ) -> Result<Box<dyn PacketDecoder>>;

    fn open_encoder(
        &self,
        parameters: &CodecParameters,
        options: &EngineOptions,
    ) -> Result<Box<dyn FrameEncoder>>;

    fn open_resampler(
        &self,
        input: &AudioParameters,
        output: &AudioParameters,
    ) -> Result<Box<dyn SampleConverter>>;

    fn open_scaler(
        &self,
        input: &VideoParameters,
        output: &VideoParameters,
        interpolation: Interpolation,
    ) -> Result<Box<dyn PictureScaler>>;

    fn find_encoder(&self, name: &str) -> Option<CodecInfo>;

    fn codecs(&self) -> Vec<CodecInfo>;

    fn output_formats(&self) -> Vec<OutputFormat>;

    /// Time base an encoder picks when the caller leaves it open.
    fn default_time_base(&self, parameters: &CodecParameters) -> Rational {
        match parameters.audio() {
            Some(audio) => Rational::new(1, audio.sample_rate as i64),
            None => parameters
                .video()
                .map(|video| video.frame_rate.invert())
                .unwrap_or(parameters.time_base),
        }
    }
}
