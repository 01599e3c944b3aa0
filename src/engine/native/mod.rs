//! Built-in engine: the `bmx` container, PCM and raw video codecs, and
//! software sample/picture converters.

mod codec;
mod container;
mod resample;
mod scale;

use once_cell::sync::Lazy;
use tracing::info;

use crate::engine::{
    CodecInfo, EngineOptions, FrameEncoder, InputContainer, MediaEngine, OutputContainer,
    OutputFormat, PacketDecoder, PictureScaler, SampleConverter,
};
use crate::error::{Result, TranscodeError};
use crate::io::{InputAdapter, OutputAdapter};
use crate::media::{
    AudioParameters, CodecParameters, FormatFlags, Interpolation, MediaKind, SampleFormat,
    StreamDescriptor, VideoParameters,
};

pub use container::{BMX_MAGIC, BmxReader, BmxWriter};

/// Codec table entry.
#[derive(Debug, Clone)]
pub(crate) struct NativeCodec {
    pub name: &'static str,
    pub kind: MediaKind,
    /// Interleaved sample format for PCM codecs.
    pub sample_format: Option<SampleFormat>,
    pub description: &'static str,
}

static CODECS: Lazy<Vec<NativeCodec>> = Lazy::new(|| {
    let pcm = |name, format, description| NativeCodec {
        name,
        kind: MediaKind::Audio,
        sample_format: Some(format),
        description,
    };
    vec![
        pcm("pcm_u8", SampleFormat::U8, "PCM unsigned 8-bit"),
        pcm("pcm_s16le", SampleFormat::S16, "PCM signed 16-bit little-endian"),
        pcm("pcm_s32le", SampleFormat::S32, "PCM signed 32-bit little-endian"),
        pcm("pcm_f32le", SampleFormat::F32, "PCM 32-bit float little-endian"),
        NativeCodec {
            name: "rawvideo",
            kind: MediaKind::Video,
            sample_format: None,
            description: "Uncompressed packed planes",
        },
    ]
});

static FORMATS: Lazy<Vec<OutputFormat>> = Lazy::new(|| {
    vec![OutputFormat {
        name: "bmx".into(),
        mime_type: "video/x-bmx".into(),
        extension: "bmx".into(),
        flags: FormatFlags::STREAMABLE | FormatFlags::VARIABLE_FPS | FormatFlags::TS_NONSTRICT,
    }]
});

pub(crate) fn lookup_codec(name: &str) -> Option<&'static NativeCodec> {
    CODECS.iter().find(|codec| codec.name == name)
}

fn lookup_format(name_or_mime: &str) -> Option<&'static OutputFormat> {
    let wanted = name_or_mime.trim().to_ascii_lowercase();
    let wanted = wanted.trim_start_matches('.');
    FORMATS.iter().find(|format| {
        format.name == wanted || format.mime_type == wanted || format.extension == wanted
    })
}

/// Software engine with no external dependencies.
///
/// Construct it once with [`NativeEngine::initialize`] and share it (usually
/// behind an `Arc`) with every pipeline object.
#[derive(Debug)]
pub struct NativeEngine {
    _private: (),
}

impl NativeEngine {
    pub fn initialize() -> Self {
        Lazy::force(&CODECS);
        Lazy::force(&FORMATS);
        info!(
            codecs = CODECS.len(),
            formats = FORMATS.len(),
            "Native media engine initialised"
        );
        Self { _private: () }
    }
}

impl MediaEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn open_input(
        &self,
        input: InputAdapter,
        format_hint: Option<&str>,
        buffer_size: usize,
    ) -> Result<Box<dyn InputContainer>> {
        if let Some(hint) = format_hint
            && lookup_format(hint).is_none()
        {
            return Err(TranscodeError::format(format!(
                "unknown input format '{hint}'"
            )));
        }
        Ok(Box::new(BmxReader::open(input, buffer_size)?))
    }

    fn guess_output_format(&self, name_or_mime: &str) -> Result<OutputFormat> {
        lookup_format(name_or_mime).cloned().ok_or_else(|| {
            TranscodeError::format(format!(
                "no output format matches '{name_or_mime}'"
            ))
        })
    }

    fn open_output(
        &self,
        output: OutputAdapter,
        format: &OutputFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn OutputContainer>> {
        let known = lookup_format(&format.name).ok_or_else(|| {
            TranscodeError::format(format!("cannot write format '{}'", format.name))
        })?;
        Ok(Box::new(BmxWriter::new(output, known.clone(), buffer_size)))
    }

    fn open_decoder(
        &self,
        stream: &StreamDescriptor,
        _options: &EngineOptions,
    ) -> Result<Box<dyn PacketDecoder>> {
        codec::open_decoder(stream)
    }

    fn open_encoder(
        &self,
        parameters: &CodecParameters,
        options: &EngineOptions,
    ) -> Result<Box<dyn FrameEncoder>> {
        let mut parameters = parameters.clone();
        if !parameters.time_base.is_valid() {
            parameters.time_base = self.default_time_base(&parameters);
        }
        codec::open_encoder(parameters, options)
    }

    fn open_resampler(
        &self,
        input: &AudioParameters,
        output: &AudioParameters,
    ) -> Result<Box<dyn SampleConverter>> {
        Ok(Box::new(resample::NativeResampler::new(input, output)?))
    }

    fn open_scaler(
        &self,
        input: &VideoParameters,
        output: &VideoParameters,
        interpolation: Interpolation,
    ) -> Result<Box<dyn PictureScaler>> {
        Ok(Box::new(scale::NativeScaler::new(
            input,
            output,
            interpolation,
        )?))
    }

    fn find_encoder(&self, name: &str) -> Option<CodecInfo> {
        lookup_codec(name).map(codec_info)
    }

    fn codecs(&self) -> Vec<CodecInfo> {
        CODECS.iter().map(codec_info).collect()
    }

    fn output_formats(&self) -> Vec<OutputFormat> {
        FORMATS.clone()
    }
}

fn codec_info(codec: &NativeCodec) -> CodecInfo {
    CodecInfo {
        name: codec.name.to_string(),
        kind: codec.kind,
        description: codec.description.to_string(),
    }
}
