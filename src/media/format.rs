//! Sample formats, pixel formats, channel layouts and flag sets.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TranscodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    F64,
    U8p,
    S16p,
    S32p,
    F32p,
    F64p,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 10] = [
        SampleFormat::U8,
        SampleFormat::S16,
        SampleFormat::S32,
        SampleFormat::F32,
        SampleFormat::F64,
        SampleFormat::U8p,
        SampleFormat::S16p,
        SampleFormat::S32p,
        SampleFormat::F32p,
        SampleFormat::F64p,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "f32",
            SampleFormat::F64 => "f64",
            SampleFormat::U8p => "u8p",
            SampleFormat::S16p => "s16p",
            SampleFormat::S32p => "s32p",
            SampleFormat::F32p => "f32p",
            SampleFormat::F64p => "f64p",
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8p => 1,
            SampleFormat::S16 | SampleFormat::S16p => 2,
            SampleFormat::S32 | SampleFormat::S32p | SampleFormat::F32 | SampleFormat::F32p => 4,
            SampleFormat::F64 | SampleFormat::F64p => 8,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(
            self,
            SampleFormat::U8p
                | SampleFormat::S16p
                | SampleFormat::S32p
                | SampleFormat::F32p
                | SampleFormat::F64p
        )
    }

    /// The interleaved variant with the same sample type.
    pub fn packed(self) -> SampleFormat {
        match self {
            SampleFormat::U8p => SampleFormat::U8,
            SampleFormat::S16p => SampleFormat::S16,
            SampleFormat::S32p => SampleFormat::S32,
            SampleFormat::F32p => SampleFormat::F32,
            SampleFormat::F64p => SampleFormat::F64,
            other => other,
        }
    }

    /// Number of buffers a frame of this format carries for `channels`.
    pub fn plane_count(self, channels: usize) -> usize {
        if self.is_planar() { channels } else { 1 }
    }

    /// Bytes one sample instant occupies inside a single plane.
    pub fn plane_stride(self, channels: usize) -> usize {
        if self.is_planar() {
            self.bytes_per_sample()
        } else {
            self.bytes_per_sample() * channels
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SampleFormat::ALL
            .into_iter()
            .find(|fmt| fmt.name() == s)
            .ok_or_else(|| TranscodeError::unsupported_conversion(format!("unknown sample format '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    Gray8,
    Yuv420p,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Rgb24,
        PixelFormat::Rgba,
        PixelFormat::Gray8,
        PixelFormat::Yuv420p,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Yuv420p => "yuv420p",
        }
    }

    /// `(bytes per row, rows)` of every plane for a picture of the given size.
    pub fn plane_layout(self, width: u32, height: u32) -> Vec<(usize, usize)> {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgb24 => vec![(w * 3, h)],
            PixelFormat::Rgba => vec![(w * 4, h)],
            PixelFormat::Gray8 => vec![(w, h)],
            PixelFormat::Yuv420p => {
                let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
                vec![(w, h), (cw, ch), (cw, ch)]
            }
        }
    }

    pub fn picture_size(self, width: u32, height: u32) -> usize {
        self.plane_layout(width, height)
            .iter()
            .map(|(row, rows)| row * rows)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PixelFormat::ALL
            .into_iter()
            .find(|fmt| fmt.name() == s)
            .ok_or_else(|| TranscodeError::unsupported_conversion(format!("unknown pixel format '{s}'")))
    }
}

bitflags! {
    /// Speaker positions present in an audio stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelLayout: u64 {
        const FRONT_LEFT = 0x1;
        const FRONT_RIGHT = 0x2;
        const FRONT_CENTER = 0x4;
        const LOW_FREQUENCY = 0x8;
        const BACK_LEFT = 0x10;
        const BACK_RIGHT = 0x20;
        const BACK_CENTER = 0x100;
        const SIDE_LEFT = 0x200;
        const SIDE_RIGHT = 0x400;

        const MONO = Self::FRONT_CENTER.bits();
        const STEREO = Self::FRONT_LEFT.bits() | Self::FRONT_RIGHT.bits();
        const LAYOUT_2POINT1 = Self::STEREO.bits() | Self::LOW_FREQUENCY.bits();
        const SURROUND = Self::STEREO.bits() | Self::FRONT_CENTER.bits();
        const QUAD = Self::STEREO.bits() | Self::BACK_LEFT.bits() | Self::BACK_RIGHT.bits();
        const LAYOUT_5POINT0 = Self::SURROUND.bits() | Self::SIDE_LEFT.bits() | Self::SIDE_RIGHT.bits();
        const LAYOUT_5POINT1 = Self::LAYOUT_5POINT0.bits() | Self::LOW_FREQUENCY.bits();
        const LAYOUT_7POINT1 = Self::LAYOUT_5POINT1.bits() | Self::BACK_LEFT.bits() | Self::BACK_RIGHT.bits();
    }
}

const NAMED_LAYOUTS: [(&str, ChannelLayout); 8] = [
    ("mono", ChannelLayout::MONO),
    ("stereo", ChannelLayout::STEREO),
    ("2.1", ChannelLayout::LAYOUT_2POINT1),
    ("3.0", ChannelLayout::SURROUND),
    ("quad", ChannelLayout::QUAD),
    ("5.0", ChannelLayout::LAYOUT_5POINT0),
    ("5.1", ChannelLayout::LAYOUT_5POINT1),
    ("7.1", ChannelLayout::LAYOUT_7POINT1),
];

impl ChannelLayout {
    pub fn channels(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Conventional layout for a bare channel count.
    pub fn default_for(channels: usize) -> Option<ChannelLayout> {
        match channels {
            1 => Some(ChannelLayout::MONO),
            2 => Some(ChannelLayout::STEREO),
            3 => Some(ChannelLayout::SURROUND),
            4 => Some(ChannelLayout::QUAD),
            5 => Some(ChannelLayout::LAYOUT_5POINT0),
            6 => Some(ChannelLayout::LAYOUT_5POINT1),
            8 => Some(ChannelLayout::LAYOUT_7POINT1),
            _ => None,
        }
    }

    /// Single-speaker flags in channel order (lowest bit first).
    pub fn positions(self) -> Vec<ChannelLayout> {
        (0..64)
            .map(|bit| 1u64 << bit)
            .filter(|bit| self.bits() & bit != 0)
            .map(ChannelLayout::from_bits_retain)
            .collect()
    }

    pub fn name(self) -> String {
        NAMED_LAYOUTS
            .iter()
            .find(|(_, layout)| *layout == self)
            .map(|(name, _)| (*name).to_string())
            .unwrap_or_else(|| format!("0x{:x}", self.bits()))
    }
}

impl FromStr for ChannelLayout {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((_, layout)) = NAMED_LAYOUTS.iter().find(|(name, _)| *name == s) {
            return Ok(*layout);
        }
        s.strip_prefix("0x")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .filter(|bits| *bits != 0)
            .map(ChannelLayout::from_bits_retain)
            .ok_or_else(|| TranscodeError::unsupported_conversion(format!("unknown channel layout '{s}'")))
    }
}

impl Serialize for ChannelLayout {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for ChannelLayout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Picture scaling algorithms understood by the scaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    FastBilinear,
    Bilinear,
    #[default]
    Bicubic,
    Experimental,
    #[serde(alias = "nearest")]
    Point,
    Area,
    Bicublin,
    Gauss,
    Sinc,
    Lanczos,
    Spline,
}

bitflags! {
    /// Capabilities and requirements advertised by an output container.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FormatFlags: u32 {
        /// Container does not need a seekable sink.
        const STREAMABLE = 0x0001;
        /// Codec extradata goes into the header rather than in-band.
        const GLOBAL_HEADER = 0x0040;
        /// Streams may carry a variable frame rate.
        const VARIABLE_FPS = 0x0400;
        /// Timestamps are optional per packet.
        const NO_TIMESTAMPS = 0x0080;
        /// Equal consecutive dts values are tolerated.
        const TS_NONSTRICT = 0x20000;
    }
}
