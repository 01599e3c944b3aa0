use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use super::lookup_codec;
use crate::engine::{EngineOptions, FrameEncoder, PacketDecoder, Received};
use crate::error::{Result, TranscodeError};
use crate::media::{
    AudioParameters, AudioSamples, ChannelLayout, CodecParameters, Frame, FrameData,
    MediaParameters, Packet, PacketFlags, Picture, SampleFormat, StreamDescriptor,
    VideoParameters,
};
use crate::time::NO_PTS;

pub(super) fn open_decoder(stream: &StreamDescriptor) -> Result<Box<dyn PacketDecoder>> {
    let codec = lookup_codec(stream.codec_name())
        .ok_or_else(|| TranscodeError::unsupported_codec(stream.codec_name().to_string()))?;
    match (&stream.parameters.media, codec.sample_format) {
        (MediaParameters::Audio(audio), Some(format)) => {
            let layout = resolve_layout(audio)?;
            Ok(Box::new(PcmDecoder {
                stream_index: stream.index,
                format,
                layout,
                sample_rate: audio.sample_rate,
                frames: VecDeque::new(),
                eof: false,
            }))
        }
        (MediaParameters::Video(video), None) => Ok(Box::new(RawVideoDecoder {
            stream_index: stream.index,
            params: video.clone(),
            frames: VecDeque::new(),
            eof: false,
        })),
        _ => Err(TranscodeError::unsupported_codec(format!(
            "{} cannot decode a {:?} stream",
            codec.name,
            stream.kind()
        ))),
    }
}

pub(super) fn open_encoder(
    mut parameters: CodecParameters,
    options: &EngineOptions,
) -> Result<Box<dyn FrameEncoder>> {
    let codec = lookup_codec(&parameters.codec_name)
        .ok_or_else(|| TranscodeError::unsupported_codec(parameters.codec_name.clone()))?;
    let frame_size_option = options
        .get("frame_size")
        .map(|value| {
            value.parse::<usize>().map_err(|_| {
                TranscodeError::invalid_state(format!("frame_size must be an integer, got '{value}'"))
            })
        })
        .transpose()?;

    let kind = parameters.kind();
    match (&mut parameters.media, codec.sample_format) {
        (MediaParameters::Audio(audio), Some(format)) => {
            if audio.sample_format != format {
                debug!(
                    codec = codec.name,
                    requested = %audio.sample_format,
                    native = %format,
                    "encoder uses its native sample format"
                );
                audio.sample_format = format;
            }
            if let Some(frame_size) = frame_size_option {
                audio.frame_size = frame_size;
            }
            let layout = resolve_layout(audio)?;
            audio.channel_layout = layout;
            audio.channels = layout.channels() as u16;
            if audio.sample_rate == 0 {
                return Err(TranscodeError::invalid_state("audio encoder needs a sample rate"));
            }
            let frame_size = audio.frame_size;
            Ok(Box::new(PcmEncoder {
                layout,
                format,
                frame_size,
                parameters,
                short_frame_seen: false,
                next_pts: 0,
                packets: VecDeque::new(),
                eof: false,
            }))
        }
        (MediaParameters::Video(video), None) => {
            if video.width == 0 || video.height == 0 {
                return Err(TranscodeError::invalid_state("video encoder needs a picture size"));
            }
            Ok(Box::new(RawVideoEncoder {
                parameters,
                next_pts: 0,
                packets: VecDeque::new(),
                eof: false,
            }))
        }
        _ => Err(TranscodeError::unsupported_codec(format!(
            "{} cannot encode {kind:?} media",
            codec.name
        ))),
    }
}

fn resolve_layout(audio: &AudioParameters) -> Result<ChannelLayout> {
    if audio.channel_layout.channels() == audio.channels as usize || audio.channels == 0 {
        if audio.channel_layout.is_empty() {
            return Err(TranscodeError::invalid_state("audio stream has no channels"));
        }
        return Ok(audio.channel_layout);
    }
    ChannelLayout::default_for(audio.channels as usize).ok_or_else(|| {
        TranscodeError::unsupported_conversion(format!(
            "no channel layout for {} channels",
            audio.channels
        ))
    })
}

fn first_known(values: [i64; 2]) -> i64 {
    values.into_iter().find(|v| *v != NO_PTS).unwrap_or(NO_PTS)
}

struct PcmDecoder {
    stream_index: usize,
    format: SampleFormat,
    layout: ChannelLayout,
    sample_rate: u32,
    frames: VecDeque<Frame>,
    eof: bool,
}

impl PacketDecoder for PcmDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.eof {
            return Err(TranscodeError::invalid_state("packet sent after end of stream"));
        }
        let frame_bytes = self.format.bytes_per_sample() * self.layout.channels();
        if packet.data.len() % frame_bytes != 0 {
            return Err(TranscodeError::format(format!(
                "pcm packet of {} bytes is not a whole number of {frame_bytes}-byte samples",
                packet.data.len()
            )));
        }
        let nb_samples = packet.data.len() / frame_bytes;
        if nb_samples == 0 {
            return Ok(());
        }
        let mut frame = Frame::new(
            self.stream_index,
            FrameData::Audio(AudioSamples {
                format: self.format,
                layout: self.layout,
                sample_rate: self.sample_rate,
                nb_samples,
                planes: vec![packet.data.to_vec()],
            }),
        );
        frame.pts = packet.pts;
        frame.pkt_dts = packet.dts;
        frame.duration = if packet.duration > 0 {
            packet.duration
        } else {
            nb_samples as i64
        };
        frame.best_effort_timestamp = first_known([packet.pts, packet.dts]);
        self.frames.push_back(frame);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<Frame>> {
        Ok(match self.frames.pop_front() {
            Some(frame) => Received::Item(frame),
            None if self.eof => Received::Eof,
            None => Received::Again,
        })
    }
}

struct RawVideoDecoder {
    stream_index: usize,
    params: VideoParameters,
    frames: VecDeque<Frame>,
    eof: bool,
}

impl PacketDecoder for RawVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.eof {
            return Err(TranscodeError::invalid_state("packet sent after end of stream"));
        }
        let VideoParameters {
            width,
            height,
            pixel_format,
            ..
        } = self.params;
        let expected = pixel_format.picture_size(width, height);
        if packet.data.len() != expected {
            return Err(TranscodeError::format(format!(
                "rawvideo packet has {} bytes, {width}x{height} {pixel_format} needs {expected}",
                packet.data.len()
            )));
        }
        let mut picture = Picture::alloc(pixel_format, width, height)?;
        let mut offset = 0;
        for plane in &mut picture.planes {
            let len = plane.data.len();
            plane.data.copy_from_slice(&packet.data[offset..offset + len]);
            offset += len;
        }
        let mut frame = Frame::new(self.stream_index, FrameData::Video(picture));
        frame.pts = packet.pts;
        frame.pkt_dts = packet.dts;
        frame.duration = packet.duration;
        frame.best_effort_timestamp = first_known([packet.pts, packet.dts]);
        self.frames.push_back(frame);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Received<Frame>> {
        Ok(match self.frames.pop_front() {
            Some(frame) => Received::Item(frame),
            None if self.eof => Received::Eof,
            None => Received::Again,
        })
    }
}

struct PcmEncoder {
    parameters: CodecParameters,
    format: SampleFormat,
    layout: ChannelLayout,
    frame_size: usize,
    short_frame_seen: bool,
    next_pts: i64,
    packets: VecDeque<Packet>,
    eof: bool,
}

impl FrameEncoder for PcmEncoder {
    fn parameters(&self) -> &CodecParameters {
        &self.parameters
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.eof {
            return Err(TranscodeError::invalid_state("frame sent after end of stream"));
        }
        let samples = frame.audio().ok_or_else(|| {
            TranscodeError::invalid_state("audio encoder received a video frame")
        })?;
        if samples.format != self.format || samples.layout != self.layout {
            return Err(TranscodeError::unsupported_conversion(format!(
                "{} expects {} {}, got {} {}",
                self.parameters.codec_name,
                self.format,
                self.layout.name(),
                samples.format,
                samples.layout.name()
            )));
        }
        if self.frame_size > 0 {
            if samples.nb_samples > self.frame_size {
                return Err(TranscodeError::invalid_state(format!(
                    "frame of {} samples exceeds encoder frame size {}",
                    samples.nb_samples, self.frame_size
                )));
            }
            if self.short_frame_seen {
                return Err(TranscodeError::invalid_state(
                    "only the final frame may be shorter than the encoder frame size",
                ));
            }
            self.short_frame_seen = samples.nb_samples < self.frame_size;
        }

        let pts = if frame.pts != NO_PTS {
            frame.pts
        } else {
            self.next_pts
        };
        let duration = samples.nb_samples as i64;
        self.next_pts = pts + duration;
        let mut packet = Packet::new(0, Bytes::copy_from_slice(&samples.planes[0]))
            .with_timestamps(pts, pts, duration);
        packet.flags = PacketFlags::KEY;
        self.packets.push_back(packet);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Received<Packet>> {
        Ok(match self.packets.pop_front() {
            Some(packet) => Received::Item(packet),
            None if self.eof => Received::Eof,
            None => Received::Again,
        })
    }
}

struct RawVideoEncoder {
    parameters: CodecParameters,
    next_pts: i64,
    packets: VecDeque<Packet>,
    eof: bool,
}

impl FrameEncoder for RawVideoEncoder {
    fn parameters(&self) -> &CodecParameters {
        &self.parameters
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.eof {
            return Err(TranscodeError::invalid_state("frame sent after end of stream"));
        }
        let picture = frame.picture().ok_or_else(|| {
            TranscodeError::invalid_state("video encoder received an audio frame")
        })?;
        if let Some(video) = self.parameters.video()
            && (picture.width != video.width
                || picture.height != video.height
                || picture.format != video.pixel_format)
        {
            return Err(TranscodeError::unsupported_conversion(format!(
                "rawvideo expects {}x{} {}, got {}x{} {}",
                video.width,
                video.height,
                video.pixel_format,
                picture.width,
                picture.height,
                picture.format
            )));
        }
        let pts = match frame.timestamp() {
            NO_PTS => self.next_pts,
            ts => ts,
        };
        let duration = frame.duration.max(0);
        self.next_pts = pts + duration.max(1);
        let mut packet = Packet::new(0, Bytes::from(picture.to_packed()))
            .with_timestamps(pts, pts, duration);
        packet.flags = PacketFlags::KEY;
        self.packets.push_back(packet);
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Received<Packet>> {
        Ok(match self.packets.pop_front() {
            Some(packet) => Received::Item(packet),
            None if self.eof => Received::Eof,
            None => Received::Again,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Rational;

    fn pcm_params(frame_size: usize) -> CodecParameters {
        CodecParameters {
            codec_name: "pcm_s16le".into(),
            bit_rate: 0,
            time_base: Rational::new(1, 48_000),
            media: MediaParameters::Audio(AudioParameters {
                channels: 2,
                channel_layout: ChannelLayout::STEREO,
                sample_rate: 48_000,
                sample_format: SampleFormat::S16,
                frame_size,
            }),
        }
    }

    fn stereo_frame(nb_samples: usize) -> Frame {
        let samples =
            AudioSamples::alloc(SampleFormat::S16, ChannelLayout::STEREO, 48_000, nb_samples)
                .unwrap();
        Frame::new(0, FrameData::Audio(samples))
    }

    #[test]
    fn fixed_size_encoder_rejects_oversized_and_repeated_short_frames() {
        let mut encoder = open_encoder(pcm_params(960), &EngineOptions::new()).unwrap();
        let err = encoder.send_frame(&stereo_frame(1024)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        encoder.send_frame(&stereo_frame(960)).unwrap();
        encoder.send_frame(&stereo_frame(100)).unwrap();
        assert!(encoder.send_frame(&stereo_frame(100)).is_err());
    }

    #[test]
    fn encoder_assigns_running_timestamps() {
        let mut encoder = open_encoder(pcm_params(0), &EngineOptions::new()).unwrap();
        encoder.send_frame(&stereo_frame(10)).unwrap();
        encoder.send_frame(&stereo_frame(20)).unwrap();
        encoder.send_eof().unwrap();
        let mut pts = Vec::new();
        while let Received::Item(packet) = encoder.receive_packet().unwrap() {
            assert_eq!(packet.dts, packet.pts);
            pts.push((packet.pts, packet.duration));
        }
        assert_eq!(pts, vec![(0, 10), (10, 20)]);
        assert!(matches!(encoder.receive_packet().unwrap(), Received::Eof));
    }

    #[test]
    fn frame_size_option_overrides_parameters() {
        let mut options = EngineOptions::new();
        options.insert("frame_size".into(), "480".into());
        let encoder = open_encoder(pcm_params(960), &options).unwrap();
        assert_eq!(encoder.parameters().audio().unwrap().frame_size, 480);
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let mut params = pcm_params(0);
        params.codec_name = "opus".into();
        let err = open_encoder(params, &EngineOptions::new()).err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsupportedCodec);
    }
}
