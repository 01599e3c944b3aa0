use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{AudioOutputConfig, TranscodeConfig, VideoOutputConfig};
use crate::media::{ChannelLayout, Interpolation, PixelFormat, SampleFormat};
use crate::time::Rational;

pub const PRESET_NAMES: [&str; 3] = ["preview", "audio-only", "remux"];

pub fn preset(name: &str) -> Result<TranscodeConfig> {
    let config = match name {
        "preview" => preview_preset(),
        "audio-only" => audio_only_preset(),
        "remux" => remux_preset(),
        other => anyhow::bail!("Unknown preset '{other}'"),
    };
    Ok(config)
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let rendered = preset(name)?.to_yaml()?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write preset config: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

/// Small, low-rate copy of both streams for quick review.
fn preview_preset() -> TranscodeConfig {
    let mut config = TranscodeConfig::new("bmx");
    config.muxer_options = options([("title", "preview")]);
    config.audio = Some(AudioOutputConfig {
        codec: Some("pcm_s16le".into()),
        channel_layout: Some(ChannelLayout::STEREO),
        sample_format: Some(SampleFormat::S16),
        frame_size: Some(960),
        ..AudioOutputConfig::default()
    });
    config.video = Some(VideoOutputConfig {
        codec: Some("rawvideo".into()),
        width: Some(320),
        height: Some(180),
        frame_rate: Some(Rational::from_int(10)),
        pixel_format: Some(PixelFormat::Yuv420p),
        interpolation_method: Interpolation::Bilinear,
        ..VideoOutputConfig::default()
    });
    config
}

fn audio_only_preset() -> TranscodeConfig {
    let mut config = TranscodeConfig::new("bmx");
    config.audio = Some(AudioOutputConfig {
        codec: Some("pcm_f32le".into()),
        sample_format: Some(SampleFormat::F32),
        frame_size: Some(1024),
        ..AudioOutputConfig::default()
    });
    config
}

/// Rewraps every stream without decoding.
fn remux_preset() -> TranscodeConfig {
    let mut config = TranscodeConfig::new("bmx");
    config.threaded_input = true;
    config.audio = Some(AudioOutputConfig {
        copy: true,
        ..AudioOutputConfig::default()
    });
    config.video = Some(VideoOutputConfig {
        copy: true,
        ..VideoOutputConfig::default()
    });
    config
}

fn options<const N: usize>(entries: [(&str, &str); N]) -> BTreeMap<String, String> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
