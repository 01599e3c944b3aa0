use tracing::{debug, info, trace};

use crate::chain::{Consumer, Outlet, Producer};
use crate::engine::{EngineOptions, FrameEncoder, MediaEngine, Received};
use crate::error::{Result, TranscodeError};
use crate::media::{CodecParameters, Frame, Packet};
use crate::mux::{Muxer, StreamHandle};
use crate::time::Rational;

/// Encodes frames for one output stream.
///
/// Packet timestamps are the frame timestamps, unchanged; a timestamp stage
/// downstream maps them onto the output stream's time base.
pub struct Encoder {
    codec: Option<Box<dyn FrameEncoder>>,
    parameters: CodecParameters,
    stream: StreamHandle,
    outlet: Outlet<Packet>,
    packets_out: u64,
    flushed: bool,
}

impl Encoder {
    /// Opens the codec and declares its output stream on `muxer`.
    pub fn open(
        engine: &dyn MediaEngine,
        parameters: &CodecParameters,
        options: &EngineOptions,
        muxer: &mut Muxer,
    ) -> Result<Self> {
        let codec = engine.open_encoder(parameters, options)?;
        let parameters = codec.parameters().clone();
        let stream = muxer.add_stream(&parameters)?;
        info!(
            stream = stream.index,
            codec = parameters.codec_name.as_str(),
            time_base = %parameters.time_base,
            frame_size = parameters.audio().map(|a| a.frame_size).unwrap_or(0),
            "Output stream declared"
        );
        Ok(Self {
            codec: Some(codec),
            parameters,
            stream,
            outlet: Outlet::new(),
            packets_out: 0,
            flushed: false,
        })
    }

    pub fn parameters(&self) -> &CodecParameters {
        &self.parameters
    }

    /// Samples per frame the codec requires; zero when any size is accepted.
    pub fn frame_size(&self) -> usize {
        self.parameters.audio().map(|a| a.frame_size).unwrap_or(0)
    }

    pub fn time_base(&self) -> Rational {
        self.parameters.time_base
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets_out
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let codec = self
                .codec
                .as_mut()
                .ok_or_else(|| TranscodeError::invalid_state("encoder closed"))?;
            match codec.receive_packet()? {
                Received::Item(mut packet) => {
                    packet.stream_index = self.stream.index;
                    self.packets_out += 1;
                    trace!(
                        stream = packet.stream_index,
                        pts = packet.pts,
                        duration = packet.duration,
                        "encoded packet"
                    );
                    self.outlet.publish(&packet)?;
                }
                Received::Again | Received::Eof => return Ok(()),
            }
        }
    }

    pub fn close(&mut self) {
        if self.codec.take().is_some() {
            debug!(
                stream = self.stream.index,
                packets = self.packets_out,
                "encoder closed"
            );
        }
    }
}

impl Producer<Packet> for Encoder {
    fn outlet(&mut self) -> &mut Outlet<Packet> {
        &mut self.outlet
    }
}

impl Consumer<Frame> for Encoder {
    fn accept(&mut self, frame: &Frame) -> Result<()> {
        self.codec
            .as_mut()
            .ok_or_else(|| TranscodeError::invalid_state("encoder closed"))?
            .send_frame(frame)?;
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

impl Drop for Encoder {
    fn drop(&mut self) {
        self.close();
    }
}
