//! Container writer with an explicit lifecycle.
//!
//! ```text
//! Open --write_headers--> HeaderWritten --packet--> HasData --write_trailer--> TrailerWritten
//!   \______________________packet (header written lazily)____/
//! ```
//!
//! Streams can only be declared while `Open`. The trailer is written once,
//! and only if at least one packet reached the container.

use std::fmt;

use tracing::{debug, info, warn};

use crate::chain::Consumer;
use crate::engine::{EngineOptions, MediaEngine, OutputContainer, OutputFormat};
use crate::error::{Result, TranscodeError};
use crate::io::{DEFAULT_BUFFER_SIZE, OutputAdapter};
use crate::media::{CodecParameters, FormatFlags, Packet};
use crate::time::{Rational, format_hms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Open,
    HeaderWritten,
    HasData,
    TrailerWritten,
}

impl fmt::Display for MuxerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MuxerState::Open => "open",
            MuxerState::HeaderWritten => "header-written",
            MuxerState::HasData => "has-data",
            MuxerState::TrailerWritten => "trailer-written",
        };
        f.write_str(name)
    }
}

/// A declared output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub index: usize,
    /// Parameters as accepted by the container.
    pub parameters: CodecParameters,
}

impl StreamHandle {
    pub fn time_base(&self) -> Rational {
        self.parameters.time_base
    }
}

pub struct Muxer {
    container: Option<Box<dyn OutputContainer>>,
    format: OutputFormat,
    options: EngineOptions,
    streams: Vec<StreamHandle>,
    packets_written: Vec<u64>,
    state: MuxerState,
}

impl Muxer {
    pub fn open(
        engine: &dyn MediaEngine,
        output: OutputAdapter,
        format: &OutputFormat,
        options: EngineOptions,
    ) -> Result<Self> {
        Self::open_with_buffer(engine, output, format, options, DEFAULT_BUFFER_SIZE)
    }

    pub fn open_with_buffer(
        engine: &dyn MediaEngine,
        output: OutputAdapter,
        format: &OutputFormat,
        options: EngineOptions,
        buffer_size: usize,
    ) -> Result<Self> {
        let container = engine.open_output(output, format, buffer_size)?;
        let format = container.format().clone();
        debug!(format = format.name.as_str(), "muxer opened");
        Ok(Self {
            container: Some(container),
            format,
            options,
            streams: Vec::new(),
            packets_written: Vec::new(),
            state: MuxerState::Open,
        })
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    pub fn flags(&self) -> FormatFlags {
        self.format.flags
    }

    pub fn streams(&self) -> &[StreamHandle] {
        &self.streams
    }

    pub fn packets_written(&self, index: usize) -> u64 {
        self.packets_written.get(index).copied().unwrap_or(0)
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_written.iter().sum()
    }

    pub fn is_closed(&self) -> bool {
        self.container.is_none()
    }

    fn container(&mut self) -> Result<&mut Box<dyn OutputContainer>> {
        self.container
            .as_mut()
            .ok_or_else(|| TranscodeError::invalid_state("muxer already closed"))
    }

    pub fn add_stream(&mut self, parameters: &CodecParameters) -> Result<StreamHandle> {
        if self.state != MuxerState::Open {
            return Err(TranscodeError::invalid_state(format!(
                "cannot add a stream once the muxer is {}",
                self.state
            )));
        }
        let accepted = self.container()?.add_stream(parameters)?;
        let handle = StreamHandle {
            index: self.streams.len(),
            parameters: accepted,
        };
        debug!(
            index = handle.index,
            codec = handle.parameters.codec_name.as_str(),
            time_base = %handle.time_base(),
            "muxer stream added"
        );
        self.streams.push(handle.clone());
        self.packets_written.push(0);
        Ok(handle)
    }

    /// Writes the container header. Later calls do nothing.
    pub fn write_headers(&mut self) -> Result<()> {
        match self.state {
            MuxerState::Open => {}
            MuxerState::HeaderWritten | MuxerState::HasData => return Ok(()),
            MuxerState::TrailerWritten => {
                return Err(TranscodeError::invalid_state(
                    "cannot write headers after the trailer",
                ));
            }
        }
        if self.streams.is_empty() {
            return Err(TranscodeError::invalid_state(
                "cannot write headers without any stream",
            ));
        }
        let options = self.options.clone();
        self.container()?.write_header(&options)?;
        self.state = MuxerState::HeaderWritten;
        info!(
            format = self.format.name.as_str(),
            streams = self.streams.len(),
            "Output header written"
        );
        Ok(())
    }

    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if self.state == MuxerState::TrailerWritten {
            return Err(TranscodeError::invalid_state(
                "packet received after the trailer",
            ));
        }
        let Some(stream) = self.streams.get(packet.stream_index) else {
            return Err(TranscodeError::invalid_state(format!(
                "packet for undeclared output stream {}",
                packet.stream_index
            )));
        };
        if !packet.has_ordered_timestamps() {
            return Err(TranscodeError::format(format!(
                "output stream {}: pts {} precedes dts {}",
                packet.stream_index, packet.pts, packet.dts
            )));
        }
        debug!(
            stream = packet.stream_index,
            pts = packet.pts,
            dts = packet.dts,
            time = %format_hms(packet.pts, stream.time_base()),
            size = packet.len(),
            "muxing packet"
        );
        self.write_headers()?;
        self.container()?.write_packet(packet)?;
        self.packets_written[packet.stream_index] += 1;
        self.state = MuxerState::HasData;
        Ok(())
    }

    /// Writes the trailer if packets were written and it is not written yet.
    ///
    /// Without data this only logs a warning: an empty input legitimately
    /// ends here.
    pub fn write_trailer(&mut self) -> Result<()> {
        match self.state {
            MuxerState::HasData => {
                self.container()?.write_trailer()?;
                self.state = MuxerState::TrailerWritten;
                info!(
                    packets = self.total_packets(),
                    format = self.format.name.as_str(),
                    "Output trailer written"
                );
            }
            MuxerState::TrailerWritten => {
                debug!("trailer already written");
            }
            MuxerState::Open | MuxerState::HeaderWritten => {
                warn!(state = %self.state, "no packets were written, skipping trailer");
            }
        }
        Ok(())
    }

    /// Writes the trailer when due, then releases the container.
    /// Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        if self.container.is_none() {
            return Ok(());
        }
        let result = self.write_trailer();
        self.container = None;
        debug!(state = %self.state, "muxer closed");
        result
    }
}

impl Consumer<Packet> for Muxer {
    fn accept(&mut self, packet: &Packet) -> Result<()> {
        self.write_packet(packet)
    }
}

impl Drop for Muxer {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing muxer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::native::NativeEngine;
    use crate::error::ErrorKind;
    use crate::io::MemorySink;
    use crate::media::{AudioParameters, ChannelLayout, MediaParameters, SampleFormat};

    fn audio_params() -> CodecParameters {
        CodecParameters {
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
        }
    }

    fn muxer(sink: &MemorySink) -> Muxer {
        let engine = NativeEngine::initialize();
        let format = engine.guess_output_format("bmx").unwrap();
        Muxer::open(
            &engine,
            OutputAdapter::new(sink.clone()),
            &format,
            EngineOptions::new(),
        )
        .unwrap()
    }

    fn packet(index: usize, ts: i64) -> Packet {
        Packet::new(index, vec![0u8; 8]).with_timestamps(ts, ts, 2)
    }

    #[test]
    fn streams_are_locked_after_headers() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        muxer.add_stream(&audio_params()).unwrap();
        muxer.write_headers().unwrap();
        muxer.write_headers().unwrap();
        assert_eq!(muxer.state(), MuxerState::HeaderWritten);
        let err = muxer.add_stream(&audio_params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn headers_need_a_stream() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        let err = muxer.write_headers().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(muxer.state(), MuxerState::Open);
    }

    #[test]
    fn first_packet_writes_header_lazily() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        muxer.add_stream(&audio_params()).unwrap();
        muxer.accept(&packet(0, 0)).unwrap();
        assert_eq!(muxer.state(), MuxerState::HasData);
        muxer.write_trailer().unwrap();
        muxer.write_trailer().unwrap();
        assert_eq!(muxer.state(), MuxerState::TrailerWritten);
        assert!(sink.contents().starts_with(b"BMX1"));
        let err = muxer.accept(&packet(0, 2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn trailer_without_data_is_a_no_op() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        muxer.add_stream(&audio_params()).unwrap();
        muxer.write_headers().unwrap();
        muxer.write_trailer().unwrap();
        assert_eq!(muxer.state(), MuxerState::HeaderWritten);
        muxer.close().unwrap();
        muxer.close().unwrap();
        assert!(muxer.is_closed());
        assert!(!sink.contents().contains(&b'T'));
    }

    #[test]
    fn close_without_packets_does_not_fail() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        muxer.close().unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn rejects_pts_before_dts_and_unknown_streams() {
        let sink = MemorySink::new();
        let mut muxer = muxer(&sink);
        muxer.add_stream(&audio_params()).unwrap();
        let backwards = Packet::new(0, vec![1u8; 4]).with_timestamps(5, 9, 1);
        assert_eq!(
            muxer.accept(&backwards).unwrap_err().kind(),
            ErrorKind::Format
        );
        assert_eq!(
            muxer.accept(&packet(3, 0)).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(muxer.packets_written(0), 0);
    }

    #[test]
    fn drop_writes_the_trailer() {
        let sink = MemorySink::new();
        {
            let mut muxer = muxer(&sink);
            muxer.add_stream(&audio_params()).unwrap();
            muxer.accept(&packet(0, 0)).unwrap();
        }
        let bytes = sink.contents();
        // trailer record: tag, stream count, one u64 counter
        assert_eq!(bytes[bytes.len() - 11], b'T');
    }
}
