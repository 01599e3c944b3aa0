//! Media data model: stream descriptors, packets and frames.

pub mod format;
pub mod frame;
pub mod packet;

use serde::{Deserialize, Serialize};

pub use format::{ChannelLayout, FormatFlags, Interpolation, PixelFormat, SampleFormat};
pub use frame::{AudioSamples, Frame, FrameData, Picture, Plane};
pub use packet::{Packet, PacketFlags};

use crate::time::Rational;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParameters {
    pub channels: u16,
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    /// Samples per encoder frame. Zero means any size is accepted.
    #[serde(default)]
    pub frame_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoParameters {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaParameters {
    Audio(AudioParameters),
    Video(VideoParameters),
    Subtitle,
    Unknown,
}

/// Everything a container or codec needs to know about one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub codec_name: String,
    #[serde(default)]
    pub bit_rate: u64,
    pub time_base: Rational,
    pub media: MediaParameters,
}

impl CodecParameters {
    pub fn kind(&self) -> MediaKind {
        match self.media {
            MediaParameters::Audio(_) => MediaKind::Audio,
            MediaParameters::Video(_) => MediaKind::Video,
            MediaParameters::Subtitle => MediaKind::Subtitle,
            MediaParameters::Unknown => MediaKind::Unknown,
        }
    }

    pub fn audio(&self) -> Option<&AudioParameters> {
        match &self.media {
            MediaParameters::Audio(audio) => Some(audio),
            _ => None,
        }
    }

    pub fn video(&self) -> Option<&VideoParameters> {
        match &self.media {
            MediaParameters::Video(video) => Some(video),
            _ => None,
        }
    }
}

/// An elementary stream declared by a container. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub parameters: CodecParameters,
}

impl StreamDescriptor {
    pub fn kind(&self) -> MediaKind {
        self.parameters.kind()
    }

    pub fn codec_name(&self) -> &str {
        &self.parameters.codec_name
    }

    pub fn time_base(&self) -> Rational {
        self.parameters.time_base
    }

    pub fn audio(&self) -> Option<&AudioParameters> {
        self.parameters.audio()
    }

    pub fn video(&self) -> Option<&VideoParameters> {
        self.parameters.video()
    }
}
