use tracing::{debug, trace};

use crate::chain::{Consumer, Outlet, Producer};
use crate::engine::{EngineOptions, MediaEngine, PacketDecoder, Received};
use crate::error::{Result, TranscodeError};
use crate::media::{Frame, Packet, StreamDescriptor};

/// Turns the packets of one stream into frames.
pub struct Decoder {
    stream: StreamDescriptor,
    codec: Option<Box<dyn PacketDecoder>>,
    outlet: Outlet<Frame>,
    frames_out: u64,
    flushed: bool,
}

impl Decoder {
    pub fn open(
        engine: &dyn MediaEngine,
        stream: &StreamDescriptor,
        options: &EngineOptions,
    ) -> Result<Self> {
        let codec = engine.open_decoder(stream, options)?;
        debug!(
            stream = stream.index,
            codec = stream.codec_name(),
            "decoder opened"
        );
        Ok(Self {
            stream: stream.clone(),
            codec: Some(codec),
            outlet: Outlet::new(),
            frames_out: 0,
            flushed: false,
        })
    }

    pub fn stream(&self) -> &StreamDescriptor {
        &self.stream
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_out
    }

    /// Publishes every frame the codec has ready.
    fn drain(&mut self) -> Result<()> {
        loop {
            let codec = self
                .codec
                .as_mut()
                .ok_or_else(|| TranscodeError::invalid_state("decoder closed"))?;
            match codec.receive_frame()? {
                Received::Item(frame) => {
                    self.frames_out += 1;
                    trace!(
                        stream = self.stream.index,
                        pts = frame.pts,
                        "decoded frame"
                    );
                    self.outlet.publish(&frame)?;
                }
                Received::Again | Received::Eof => return Ok(()),
            }
        }
    }

    /// Releases the codec. Later packets are refused.
    pub fn close(&mut self) {
        if self.codec.take().is_some() {
            debug!(
                stream = self.stream.index,
                frames = self.frames_out,
                "decoder closed"
            );
        }
    }
}

impl Producer<Frame> for Decoder {
    fn outlet(&mut self) -> &mut Outlet<Frame> {
        &mut self.outlet
    }
}

impl Consumer<Packet> for Decoder {
    fn accept(&mut self, packet: &Packet) -> Result<()> {
        if packet.stream_index != self.stream.index {
            return Ok(());
        }
        self.codec
            .as_mut()
            .ok_or_else(|| TranscodeError::invalid_state("decoder closed"))?
            .send_packet(packet)?;
        self.drain()
    }

    fn finish(&mut self) -> Result<()> {
        if !self.flushed {
            self.flushed = true;
            if let Some(codec) = self.codec.as_mut() {
                codec.send_eof()?;
                self.drain()?;
            }
        }
        self.outlet.finish()
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::chain::{FnConsumer, Shared};
    use crate::engine::native::NativeEngine;
    use crate::error::ErrorKind;
    use crate::media::{
        AudioParameters, ChannelLayout, CodecParameters, FrameData, MediaParameters, Picture,
        PixelFormat, SampleFormat,
    };
    use crate::time::Rational;

    fn stereo_stream(index: usize) -> StreamDescriptor {
        StreamDescriptor {
            index,
            parameters: CodecParameters {
                codec_name: "pcm_s16le".into(),
                bit_rate: 0,
                time_base: Rational::new(1, 48_000),
                media: MediaParameters::Audio(AudioParameters {
                    channels: 2,
                    channel_layout: ChannelLayout::STEREO,
                    sample_rate: 48_000,
                    sample_format: SampleFormat::S16,
                    frame_size: 0,
                }),
            },
        }
    }

    /// Holds every frame back until end of stream, like a codec with delay.
    struct DelayedCodec {
        held: VecDeque<Frame>,
        eof: bool,
        eof_calls: Arc<AtomicUsize>,
    }

    impl PacketDecoder for DelayedCodec {
        fn send_packet(&mut self, packet: &Packet) -> Result<()> {
            let picture = Picture::alloc(PixelFormat::Gray8, 1, 1)?;
            let mut frame = Frame::new(packet.stream_index, FrameData::Video(picture));
            frame.pts = packet.pts;
            self.held.push_back(frame);
            Ok(())
        }

        fn send_eof(&mut self) -> Result<()> {
            self.eof = true;
            self.eof_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<Received<Frame>> {
            if !self.eof {
                return Ok(Received::Again);
            }
            Ok(match self.held.pop_front() {
                Some(frame) => Received::Item(frame),
                None => Received::Eof,
            })
        }
    }

    #[test]
    fn packets_of_other_streams_are_ignored() {
        let engine = NativeEngine::initialize();
        let mut decoder =
            Decoder::open(&engine, &stereo_stream(1), &EngineOptions::new()).unwrap();
        let sizes = Shared::new(Vec::new());
        let sink = sizes.clone();
        decoder.connect(FnConsumer(move |frame: &Frame| -> Result<()> {
            sink.lock()?.push(frame.audio().map(|a| a.nb_samples));
            Ok(())
        }));

        // seven bytes would be a format error if it reached the codec
        decoder.accept(&Packet::new(0, vec![0u8; 7])).unwrap();
        decoder
            .accept(&Packet::new(1, vec![0u8; 8]).with_timestamps(0, 0, 2))
            .unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![Some(2)]);
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn repeated_finish_flushes_once() {
        let eof_calls = Arc::new(AtomicUsize::new(0));
        let mut decoder = Decoder {
            stream: stereo_stream(0),
            codec: Some(Box::new(DelayedCodec {
                held: VecDeque::new(),
                eof: false,
                eof_calls: Arc::clone(&eof_calls),
            })),
            outlet: Outlet::new(),
            frames_out: 0,
            flushed: false,
        };
        let seen = Shared::new(Vec::new());
        let sink = seen.clone();
        decoder.connect(FnConsumer(move |frame: &Frame| -> Result<()> {
            sink.lock()?.push(frame.pts);
            Ok(())
        }));

        decoder
            .accept(&Packet::new(0, vec![1u8]).with_timestamps(5, 5, 1))
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        decoder.finish().unwrap();
        decoder.finish().unwrap();
        assert_eq!(eof_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn closed_decoder_refuses_packets() {
        let engine = NativeEngine::initialize();
        let mut decoder =
            Decoder::open(&engine, &stereo_stream(0), &EngineOptions::new()).unwrap();
        decoder.close();
        decoder.close();
        let err = decoder.accept(&Packet::new(0, vec![0u8; 4])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        decoder.finish().unwrap();
    }
}
