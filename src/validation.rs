use serde::Serialize;

use crate::config::{AudioOutputConfig, CONFIG_VERSION, TranscodeConfig, VideoOutputConfig};
use crate::engine::MediaEngine;
use crate::media::{ChannelLayout, MediaKind};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks a profile against what `engine` can actually do, without opening
/// any input.
pub fn validate_config(config: &TranscodeConfig, engine: &dyn MediaEngine) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != CONFIG_VERSION {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if config.container_format.trim().is_empty() {
        report
            .errors
            .push("Container format cannot be empty".into());
    } else if let Err(err) = engine.guess_output_format(&config.container_format) {
        report.errors.push(format!(
            "Container format '{}' is not available: {err}",
            config.container_format
        ));
    }

    if config.buffer_size == 0 {
        report.errors.push("Buffer size must be positive".into());
    }

    if config.audio.is_none() && config.video.is_none() {
        report
            .errors
            .push("At least one of 'audio' or 'video' must be configured".into());
    }

    if let Some(audio) = &config.audio {
        report.merge(validate_audio(audio, engine));
    }
    if let Some(video) = &config.video {
        report.merge(validate_video(video, engine));
    }

    report
}

fn validate_audio(audio: &AudioOutputConfig, engine: &dyn MediaEngine) -> ValidationReport {
    let mut report = ValidationReport::default();
    if audio.copy {
        if audio.codec.is_some() || audio.sample_rate.is_some() || audio.frame_size.is_some() {
            report
                .warnings
                .push("Audio is stream-copied; codec and sample settings are ignored".into());
        }
        return report;
    }

    check_encoder(&mut report, "Audio", audio.codec.as_deref(), MediaKind::Audio, engine);

    match (audio.channels, audio.channel_layout) {
        (Some(0), _) => report
            .errors
            .push("Audio channel count must be positive".into()),
        (Some(channels), Some(layout)) if layout.channels() != channels as usize => {
            report.errors.push(format!(
                "Audio channel layout '{}' has {} channels, but channels is {channels}",
                layout.name(),
                layout.channels()
            ));
        }
        (Some(channels), None) if ChannelLayout::default_for(channels as usize).is_none() => {
            report.errors.push(format!(
                "No default channel layout for {channels} channels; set channel_layout"
            ));
        }
        (_, Some(layout)) if layout.is_empty() => report
            .errors
            .push("Audio channel layout cannot be empty".into()),
        _ => {}
    }

    if audio.sample_rate == Some(0) {
        report
            .errors
            .push("Audio sample rate must be positive".into());
    }
    if audio.frame_size == Some(0) {
        report
            .warnings
            .push("Audio frame_size 0 lets every frame through unchanged".into());
    }
    report
}

fn validate_video(video: &VideoOutputConfig, engine: &dyn MediaEngine) -> ValidationReport {
    let mut report = ValidationReport::default();
    if video.copy {
        if video.codec.is_some() || video.width.is_some() || video.frame_rate.is_some() {
            report
                .warnings
                .push("Video is stream-copied; codec and picture settings are ignored".into());
        }
        return report;
    }

    check_encoder(&mut report, "Video", video.codec.as_deref(), MediaKind::Video, engine);

    if video.width == Some(0) || video.height == Some(0) {
        report
            .errors
            .push("Video dimensions must be positive".into());
    }
    if let Some(rate) = video.frame_rate
        && !rate.is_valid()
    {
        report
            .errors
            .push(format!("Video frame rate must be positive, got {rate}"));
    }
    if video.width.is_some() != video.height.is_some() {
        report.warnings.push(
            "Only one video dimension is set; the other is taken from the input".into(),
        );
    }
    report
}

fn check_encoder(
    report: &mut ValidationReport,
    section: &str,
    codec: Option<&str>,
    kind: MediaKind,
    engine: &dyn MediaEngine,
) {
    let Some(name) = codec else {
        report.warnings.push(format!(
            "{section} codec not set; the input stream's codec will be used"
        ));
        return;
    };
    match engine.find_encoder(name) {
        None => report
            .errors
            .push(format!("{section} encoder '{name}' is not available")),
        Some(info) if info.kind != kind => report.errors.push(format!(
            "{section} encoder '{name}' encodes {:?}, not {kind:?}",
            info.kind
        )),
        Some(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::NativeEngine;
    use crate::time::Rational;

    #[test]
    fn flags_layout_disagreement_and_wrong_kind_encoder() {
        let engine = NativeEngine::initialize();
        let mut config = TranscodeConfig::new("bmx");
        config.audio = Some(AudioOutputConfig {
            codec: Some("rawvideo".into()),
            channels: Some(6),
            channel_layout: Some(ChannelLayout::STEREO),
            ..AudioOutputConfig::default()
        });
        config.video = Some(VideoOutputConfig {
            codec: Some("rawvideo".into()),
            frame_rate: Some(Rational::new(0, 1)),
            ..VideoOutputConfig::default()
        });
        let report = validate_config(&config, &engine);
        assert!(!report.is_ok());
        assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    }
}
