#![allow(dead_code)]

use std::io::Cursor;

use bunker_transcode::demux::Demuxer;
use bunker_transcode::engine::EngineOptions;
use bunker_transcode::engine::MediaEngine;
use bunker_transcode::engine::native::NativeEngine;
use bunker_transcode::io::{InputAdapter, MemorySink, OutputAdapter};
use bunker_transcode::media::{
    AudioParameters, ChannelLayout, CodecParameters, MediaParameters, Packet, PixelFormat,
    SampleFormat, StreamDescriptor, VideoParameters,
};
use bunker_transcode::mux::Muxer;
use bunker_transcode::time::Rational;

pub const VIDEO_TIME_BASE: Rational = Rational::new(1, 90_000);

pub fn stereo_s16(sample_rate: u32) -> CodecParameters {
    CodecParameters {
        codec_name: "pcm_s16le".into(),
        bit_rate: 0,
        time_base: Rational::new(1, sample_rate as i64),
        media: MediaParameters::Audio(AudioParameters {
            channels: 2,
            channel_layout: ChannelLayout::STEREO,
            sample_rate,
            sample_format: SampleFormat::S16,
            frame_size: 0,
        }),
    }
}

pub fn gray_video(width: u32, height: u32, fps: i64) -> CodecParameters {
    CodecParameters {
        codec_name: "rawvideo".into(),
        bit_rate: 0,
        time_base: VIDEO_TIME_BASE,
        media: MediaParameters::Video(VideoParameters {
            width,
            height,
            pixel_format: PixelFormat::Gray8,
            frame_rate: Rational::from_int(fps),
        }),
    }
}

/// Interleaved s16 stereo; every sample carries its running index.
pub fn pcm_packet(stream: usize, first_sample: i64, nb_samples: usize) -> Packet {
    let mut data = Vec::with_capacity(nb_samples * 4);
    for n in 0..nb_samples as i64 {
        let value = ((first_sample + n) % i16::MAX as i64) as i16;
        data.extend_from_slice(&value.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
    }
    Packet::new(stream, data).with_timestamps(first_sample, first_sample, nb_samples as i64)
}

pub fn gray_packet(stream: usize, frame: i64, fps: i64, width: u32, height: u32) -> Packet {
    let duration = VIDEO_TIME_BASE.den / fps;
    let shade = (frame * 16 % 256) as u8;
    Packet::new(stream, vec![shade; (width * height) as usize]).with_timestamps(
        frame * duration,
        frame * duration,
        duration,
    )
}

/// Muxes `packets` into an in-memory bmx file.
pub fn build_input(streams: &[CodecParameters], packets: &[Packet]) -> Vec<u8> {
    let engine = NativeEngine::initialize();
    let format = engine.guess_output_format("bmx").unwrap();
    let sink = MemorySink::new();
    let mut muxer = Muxer::open(
        &engine,
        OutputAdapter::new(sink.clone()),
        &format,
        EngineOptions::new(),
    )
    .unwrap();
    for parameters in streams {
        muxer.add_stream(parameters).unwrap();
    }
    for packet in packets {
        muxer.write_packet(packet).unwrap();
    }
    muxer.close().unwrap();
    sink.contents()
}

/// Stream table and every packet of a bmx file.
pub fn read_all(bytes: Vec<u8>) -> (Vec<StreamDescriptor>, Vec<Packet>) {
    let engine = NativeEngine::initialize();
    let (streams, mut demuxer) =
        Demuxer::open(&engine, InputAdapter::from_reader(Cursor::new(bytes)), None).unwrap();
    let mut packets = Vec::new();
    while let Some(packet) = demuxer.next_packet().unwrap() {
        packets.push(packet);
    }
    (streams, packets)
}

pub fn stream_packets(packets: &[Packet], stream: usize) -> Vec<&Packet> {
    packets
        .iter()
        .filter(|packet| packet.stream_index == stream)
        .collect()
}
