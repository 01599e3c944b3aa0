mod common;

use std::io::Cursor;
use std::sync::Arc;

use bunker_transcode::config::{AudioOutputConfig, TranscodeConfig, VideoOutputConfig};
use bunker_transcode::io::MemorySink;
use bunker_transcode::media::{MediaKind, Packet};
use bunker_transcode::observability::{
    FRAMES_DECODED, FRAMES_RATE_DROPPED, MetricsCollector, PACKETS_DROPPED,
};
use bunker_transcode::time::Rational;
use bunker_transcode::{ErrorKind, NativeEngine, Transcoder};

use common::*;

fn transcoder(config: TranscodeConfig) -> Transcoder {
    Transcoder::new(Arc::new(NativeEngine::initialize()), config)
}

fn reblocking_config(threaded: bool) -> TranscodeConfig {
    let mut config = TranscodeConfig::new("bmx");
    config.threaded_input = threaded;
    config.buffer_size = 4096;
    config.audio = Some(AudioOutputConfig {
        codec: Some("pcm_s16le".into()),
        frame_size: Some(960),
        ..AudioOutputConfig::default()
    });
    config
}

fn ten_audio_packets() -> Vec<u8> {
    let packets: Vec<Packet> = (0..10).map(|n| pcm_packet(0, n * 1024, 1024)).collect();
    build_input(&[stereo_s16(48_000)], &packets)
}

#[test]
fn audio_is_reblocked_into_encoder_frames_without_gaps() {
    let sink = MemorySink::new();
    let summary = transcoder(reblocking_config(false))
        .transcode(Cursor::new(ten_audio_packets()), sink.clone())
        .unwrap();
    assert!(summary.trailer_written);
    assert_eq!(summary.packets_read, 10);

    let (streams, packets) = read_all(sink.contents());
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].time_base(), Rational::new(1, 48_000));

    // 10 * 1024 = 10 full blocks of 960 plus a 640 sample tail
    let durations: Vec<i64> = packets.iter().map(|p| p.duration).collect();
    assert_eq!(durations.len(), 11);
    assert!(durations[..10].iter().all(|d| *d == 960));
    assert_eq!(durations[10], 640);
    assert_eq!(durations.iter().sum::<i64>(), 10 * 1024);

    let mut expected = 0;
    for packet in &packets {
        assert_eq!(packet.pts, expected);
        assert_eq!(packet.dts, packet.pts);
        assert_eq!(packet.len() as i64, packet.duration * 4);
        expected += packet.duration;
    }
    assert_eq!(summary.packets_written, vec![11]);
}

#[test]
fn threaded_input_produces_the_same_output() {
    let direct = MemorySink::new();
    transcoder(reblocking_config(false))
        .transcode(Cursor::new(ten_audio_packets()), direct.clone())
        .unwrap();
    let threaded = MemorySink::new();
    transcoder(reblocking_config(true))
        .transcode(Cursor::new(ten_audio_packets()), threaded.clone())
        .unwrap();
    assert_eq!(direct.contents(), threaded.contents());
}

#[test]
fn thirty_fps_is_decimated_to_ten() {
    let packets: Vec<Packet> = (0..9).map(|n| gray_packet(0, n, 30, 4, 4)).collect();
    let input = build_input(&[gray_video(4, 4, 30)], &packets);

    let mut config = TranscodeConfig::new("bmx");
    config.video = Some(VideoOutputConfig {
        codec: Some("rawvideo".into()),
        frame_rate: Some(Rational::from_int(10)),
        ..VideoOutputConfig::default()
    });
    let metrics = MetricsCollector::new();
    let sink = MemorySink::new();
    transcoder(config)
        .with_metrics(metrics.clone())
        .transcode(Cursor::new(input), sink.clone())
        .unwrap();

    let (streams, packets) = read_all(sink.contents());
    assert_eq!(streams[0].kind(), MediaKind::Video);
    let timing: Vec<(i64, i64)> = packets.iter().map(|p| (p.pts, p.duration)).collect();
    assert_eq!(timing, vec![(0, 9000), (9000, 9000), (18000, 9000)]);
    // frames 0, 3 and 6 survive
    assert_eq!(packets[1].data[0], 3 * 16);
    assert_eq!(packets[2].data[0], 6 * 16);
    assert_eq!(metrics.counter(FRAMES_DECODED), 9);
    assert_eq!(metrics.counter(FRAMES_RATE_DROPPED), 6);
}

#[test]
fn packets_of_unrouted_streams_are_dropped() {
    let mut packets = Vec::new();
    for n in 0..4 {
        packets.push(pcm_packet(0, n * 1600, 1600));
        packets.push(gray_packet(1, n, 30, 2, 2));
    }
    let input = build_input(&[stereo_s16(48_000), gray_video(2, 2, 30)], &packets);

    let mut config = TranscodeConfig::new("bmx");
    config.audio = Some(AudioOutputConfig {
        codec: Some("pcm_s16le".into()),
        ..AudioOutputConfig::default()
    });
    let metrics = MetricsCollector::new();
    let sink = MemorySink::new();
    let summary = transcoder(config)
        .with_metrics(metrics.clone())
        .transcode(Cursor::new(input), sink.clone())
        .unwrap();

    assert_eq!(summary.packets_read, 8);
    assert_eq!(summary.packets_routed, 4);
    assert_eq!(summary.packets_dropped, 4);
    assert_eq!(metrics.counter(PACKETS_DROPPED), 4);

    let (streams, packets) = read_all(sink.contents());
    assert_eq!(streams.len(), 1);
    assert_eq!(packets.len(), 4);
    assert!(packets.iter().all(|p| p.stream_index == 0));
}

#[test]
fn failure_mid_stream_still_writes_the_trailer() {
    let mut packets = vec![pcm_packet(0, 0, 1024), pcm_packet(0, 1024, 1024)];
    // not a whole number of 4-byte stereo samples
    packets.push(Packet::new(0, vec![0u8; 7]).with_timestamps(2048, 2048, 1));
    let input = build_input(&[stereo_s16(48_000)], &packets);

    let sink = MemorySink::new();
    let err = transcoder(reblocking_config(false))
        .transcode(Cursor::new(input), sink.clone())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);

    let bytes = sink.contents();
    assert!(bytes.starts_with(b"BMX1"));
    // trailer record: tag, stream count, one u64 counter
    assert_eq!(bytes[bytes.len() - 11], b'T');
    let (_, written) = read_all(bytes);
    assert_eq!(written.len(), 2);
    assert!(written.iter().all(|p| p.duration == 960));
}

#[test]
fn stream_copy_remaps_indices_in_output_order() {
    let mut packets = Vec::new();
    for n in 0..3 {
        packets.push(gray_packet(0, n, 25, 2, 2));
        packets.push(pcm_packet(1, n * 1920, 1920));
    }
    let input = build_input(&[gray_video(2, 2, 25), stereo_s16(48_000)], &packets);

    let mut config = TranscodeConfig::new("bmx");
    config.audio = Some(AudioOutputConfig {
        copy: true,
        ..AudioOutputConfig::default()
    });
    config.video = Some(VideoOutputConfig {
        copy: true,
        ..VideoOutputConfig::default()
    });
    let sink = MemorySink::new();
    let summary = transcoder(config)
        .transcode(Cursor::new(input), sink.clone())
        .unwrap();
    assert_eq!(summary.packets_written, vec![3, 3]);

    let (streams, packets) = read_all(sink.contents());
    assert_eq!(streams[0].kind(), MediaKind::Audio);
    assert_eq!(streams[1].kind(), MediaKind::Video);
    let audio: Vec<i64> = stream_packets(&packets, 0).iter().map(|p| p.pts).collect();
    let video: Vec<i64> = stream_packets(&packets, 1).iter().map(|p| p.pts).collect();
    assert_eq!(audio, vec![0, 1920, 3840]);
    assert_eq!(video, vec![0, 3600, 7200]);
}

#[test]
fn config_without_matching_streams_is_rejected() {
    let packets: Vec<Packet> = (0..2).map(|n| pcm_packet(0, n * 1024, 1024)).collect();
    let input = build_input(&[stereo_s16(48_000)], &packets);

    let mut config = TranscodeConfig::new("bmx");
    config.video = Some(VideoOutputConfig::default());
    let err = transcoder(config)
        .transcode(Cursor::new(input), MemorySink::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn explicit_source_of_the_wrong_kind_is_an_error() {
    let packets: Vec<Packet> = (0..2).map(|n| pcm_packet(0, n * 1024, 1024)).collect();
    let input = build_input(&[stereo_s16(48_000)], &packets);

    let mut config = TranscodeConfig::new("bmx");
    config.video = Some(VideoOutputConfig {
        source_stream: Some(0),
        ..VideoOutputConfig::default()
    });
    let err = transcoder(config)
        .transcode(Cursor::new(input), MemorySink::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}
