use tracing::{debug, info};

use crate::engine::{InputContainer, MediaEngine};
use crate::error::{Result, TranscodeError};
use crate::io::{DEFAULT_BUFFER_SIZE, InputAdapter};
use crate::media::{MediaKind, Packet, StreamDescriptor};
use crate::time::format_hms;

/// Reads compressed packets out of an input container.
pub struct Demuxer {
    container: Option<Box<dyn InputContainer>>,
    streams: Vec<StreamDescriptor>,
    packets_read: u64,
}

impl Demuxer {
    /// Opens the container and resolves its stream table.
    pub fn open(
        engine: &dyn MediaEngine,
        input: InputAdapter,
        format_hint: Option<&str>,
    ) -> Result<(Vec<StreamDescriptor>, Demuxer)> {
        Self::open_with_buffer(engine, input, format_hint, DEFAULT_BUFFER_SIZE)
    }

    pub fn open_with_buffer(
        engine: &dyn MediaEngine,
        input: InputAdapter,
        format_hint: Option<&str>,
        buffer_size: usize,
    ) -> Result<(Vec<StreamDescriptor>, Demuxer)> {
        let container = engine.open_input(input, format_hint, buffer_size)?;
        let streams = container.streams().to_vec();
        for stream in &streams {
            info!(
                index = stream.index,
                kind = ?stream.kind(),
                codec = stream.codec_name(),
                time_base = %stream.time_base(),
                "Input stream"
            );
        }
        let demuxer = Demuxer {
            container: Some(container),
            streams: streams.clone(),
            packets_read: 0,
        };
        Ok((streams, demuxer))
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn stream(&self, index: usize) -> Option<&StreamDescriptor> {
        self.streams.get(index)
    }

    /// First stream of the given kind.
    pub fn best_stream(&self, kind: MediaKind) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|stream| stream.kind() == kind)
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    /// Next packet in container order, or `None` at end of stream.
    pub fn next_packet(&mut self) -> Result<Option<Packet>> {
        let container = self
            .container
            .as_mut()
            .ok_or_else(|| TranscodeError::invalid_state("demuxer already closed"))?;
        let packet = container.read_packet()?;
        if let Some(packet) = &packet {
            self.packets_read += 1;
            if let Some(stream) = self.streams.get(packet.stream_index) {
                debug!(
                    stream = packet.stream_index,
                    pts = packet.pts,
                    dts = packet.dts,
                    time = %format_hms(packet.pts, stream.time_base()),
                    size = packet.len(),
                    "demuxed packet"
                );
            }
        }
        Ok(packet)
    }

    pub fn is_closed(&self) -> bool {
        self.container.is_none()
    }

    /// Releases the container. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.container.take().is_some() {
            debug!(packets = self.packets_read, "demuxer closed");
        }
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.close();
    }
}
