use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;
use crate::io::DEFAULT_BUFFER_SIZE;
use crate::media::{
    AudioParameters, ChannelLayout, Interpolation, PixelFormat, SampleFormat, VideoParameters,
};
use crate::time::Rational;

pub const CONFIG_VERSION: u32 = 1;

/// A transcode profile, usually loaded from YAML.
///
/// ```yaml
/// version: 1
/// container_format: bmx
/// audio:
///   codec: pcm_s16le
///   sample_format: s16
///   frame_size: 960
/// video:
///   codec: rawvideo
///   width: 640
///   height: 360
///   frame_rate: 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    pub version: u32,
    /// Output container, by name, MIME type or extension.
    pub container_format: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Read the input on a dedicated thread.
    #[serde(default)]
    pub threaded_input: bool,
    /// Passed to the container writer untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub muxer_options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoOutputConfig>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

/// Output audio stream. Unset fields inherit from the input stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default)]
    pub bit_rate: u64,
    /// Input stream index; the first audio stream when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stream: Option<usize>,
    /// Copy packets instead of transcoding.
    #[serde(default)]
    pub copy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_layout: Option<ChannelLayout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_format: Option<SampleFormat>,
    /// Samples per encoded frame; the encoder's choice when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<usize>,
    /// Encoder options.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Output video stream. Unset fields inherit from the input stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoOutputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default)]
    pub bit_rate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stream: Option<usize>,
    #[serde(default)]
    pub copy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Integer or `"num/den"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<Rational>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_format: Option<PixelFormat>,
    #[serde(default)]
    pub interpolation_method: Interpolation,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl TranscodeConfig {
    pub fn new(container_format: impl Into<String>) -> Self {
        Self {
            version: CONFIG_VERSION,
            container_format: container_format.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            threaded_input: false,
            muxer_options: BTreeMap::new(),
            audio: None,
            video: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: TranscodeConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render config YAML")
    }
}

impl AudioOutputConfig {
    /// Target parameters for an input stream described by `input`.
    pub fn resolve(&self, input: &AudioParameters) -> Result<AudioParameters, TranscodeError> {
        let channel_layout = match (self.channel_layout, self.channels) {
            (Some(layout), _) => layout,
            (None, Some(channels)) if channels as usize == input.channel_layout.channels() => {
                input.channel_layout
            }
            (None, Some(channels)) => ChannelLayout::default_for(channels as usize)
                .ok_or_else(|| {
                    TranscodeError::unsupported_conversion(format!(
                        "no default channel layout for {channels} channels"
                    ))
                })?,
            (None, None) => input.channel_layout,
        };
        Ok(AudioParameters {
            channels: channel_layout.channels() as u16,
            channel_layout,
            sample_rate: self.sample_rate.unwrap_or(input.sample_rate),
            sample_format: self.sample_format.unwrap_or(input.sample_format),
            frame_size: self.frame_size.unwrap_or(0),
        })
    }
}

impl VideoOutputConfig {
    pub fn resolve(&self, input: &VideoParameters) -> VideoParameters {
        VideoParameters {
            width: self.width.unwrap_or(input.width),
            height: self.height.unwrap_or(input.height),
            pixel_format: self.pixel_format.unwrap_or(input.pixel_format),
            frame_rate: self.frame_rate.unwrap_or(input.frame_rate),
        }
    }
}

/// Resolves glob patterns to existing files, in pattern order.
pub fn expand_inputs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut resolved = Vec::new();
    for pattern in patterns {
        let matches =
            glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
        let mut found = false;
        for entry in matches {
            let path = entry?;
            if path.is_file() {
                resolved.push(path);
                found = true;
            }
        }
        if !found {
            anyhow::bail!("No inputs matched pattern: {pattern}");
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_profile() {
        let config = TranscodeConfig::from_yaml(
            r#"
version: 1
container_format: video/x-bmx
threaded_input: true
muxer_options:
  interleave: "0"
  title: demo
audio:
  codec: pcm_s16le
  channel_layout: "5.1"
  sample_format: s16
  frame_size: 960
video:
  codec: rawvideo
  width: 320
  height: 240
  frame_rate: 30000/1001
  pixel_format: yuv420p
  interpolation_method: lanczos
"#,
        )
        .unwrap();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.threaded_input);
        assert_eq!(config.muxer_options["title"], "demo");
        let audio = config.audio.as_ref().unwrap();
        assert_eq!(audio.channel_layout, Some(ChannelLayout::LAYOUT_5POINT1));
        assert_eq!(audio.frame_size, Some(960));
        let video = config.video.as_ref().unwrap();
        assert_eq!(video.frame_rate, Some(Rational::new(30000, 1001)));
        assert_eq!(video.interpolation_method, Interpolation::Lanczos);
        assert!(!video.copy);
    }

    #[test]
    fn integer_frame_rate_and_default_interpolation() {
        let config = TranscodeConfig::from_yaml(
            "version: 1\ncontainer_format: bmx\nvideo:\n  frame_rate: 10\n",
        )
        .unwrap();
        let video = config.video.unwrap();
        assert_eq!(video.frame_rate, Some(Rational::from_int(10)));
        assert_eq!(video.interpolation_method, Interpolation::Bicubic);
        assert!(config.audio.is_none());
    }

    #[test]
    fn audio_resolution_inherits_and_overrides() {
        let input = AudioParameters {
            channels: 2,
            channel_layout: ChannelLayout::STEREO,
            sample_rate: 48_000,
            sample_format: SampleFormat::F32p,
            frame_size: 1024,
        };
        let inherit = AudioOutputConfig::default().resolve(&input).unwrap();
        assert_eq!(inherit.channel_layout, ChannelLayout::STEREO);
        assert_eq!(inherit.sample_format, SampleFormat::F32p);
        assert_eq!(inherit.frame_size, 0);

        let mono = AudioOutputConfig {
            channels: Some(1),
            ..AudioOutputConfig::default()
        }
        .resolve(&input)
        .unwrap();
        assert_eq!(mono.channel_layout, ChannelLayout::MONO);
        assert_eq!(mono.channels, 1);

        let odd = AudioOutputConfig {
            channels: Some(13),
            ..AudioOutputConfig::default()
        };
        assert!(odd.resolve(&input).is_err());
    }

    #[test]
    fn yaml_round_trip_keeps_rational_text() {
        let mut config = TranscodeConfig::new("bmx");
        config.video = Some(VideoOutputConfig {
            frame_rate: Some(Rational::new(24000, 1001)),
            ..VideoOutputConfig::default()
        });
        let text = config.to_yaml().unwrap();
        assert!(text.contains("24000/1001"));
        assert_eq!(TranscodeConfig::from_yaml(&text).unwrap(), config);
    }
}
