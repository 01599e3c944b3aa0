//! The `bmx` container: a sequential, seek-free record stream.
//!
//! Layout (little-endian):
//!
//! ```text
//! "BMX1" u16:version
//! u16:metadata_count { str16:key str16:value }*
//! u16:stream_count { stream_record }*
//! { 'P' u32:stream i64:pts i64:dts i64:duration u32:flags u32:size bytes }*
//! 'T' u16:stream_count { u64:packet_count }*
//! ```

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;
use tracing::{debug, warn};

use super::lookup_codec;
use crate::engine::{EngineOptions, InputContainer, OutputContainer, OutputFormat};
use crate::error::{Result, TranscodeError};
use crate::io::{InputAdapter, OutputAdapter, ReadStatus};
use crate::media::{
    AudioParameters, ChannelLayout, CodecParameters, MediaKind, MediaParameters, Packet,
    PacketFlags, StreamDescriptor, VideoParameters,
};
use crate::time::{NO_PTS, Rational};

pub const BMX_MAGIC: &[u8; 4] = b"BMX1";
const VERSION: u16 = 1;
const TAG_PACKET: u8 = b'P';
const TAG_TRAILER: u8 = b'T';
const MAX_PACKET_SIZE: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_INTERLEAVE_DELTA_US: i64 = 10_000_000;

fn kind_code(kind: MediaKind) -> u8 {
    match kind {
        MediaKind::Unknown => 0,
        MediaKind::Audio => 1,
        MediaKind::Video => 2,
        MediaKind::Subtitle => 3,
    }
}

/// Engine-owned read buffer refilled through the adapter.
struct SourceBuffer {
    adapter: InputAdapter,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    eof: bool,
}

impl SourceBuffer {
    fn new(adapter: InputAdapter, size: usize) -> Self {
        Self {
            adapter,
            buf: vec![0u8; size.max(16)].into_boxed_slice(),
            pos: 0,
            len: 0,
            eof: false,
        }
    }

    fn refill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        match self.adapter.read(&mut self.buf)? {
            ReadStatus::Data(n) => {
                self.pos = 0;
                self.len = n;
                Ok(true)
            }
            ReadStatus::Eof => {
                self.eof = true;
                Ok(false)
            }
        }
    }

    /// Fills `out` completely. Returns `false` on a clean end of input before
    /// the first byte; running dry mid-way is a format error.
    fn read_exact(&mut self, out: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < out.len() {
            if self.pos == self.len && !self.refill()? {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(TranscodeError::format("bmx stream truncated inside a record"));
            }
            let n = (out.len() - filled).min(self.len - self.pos);
            out[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(true)
    }

    fn require(&mut self, out: &mut [u8]) -> Result<()> {
        if self.read_exact(out)? {
            Ok(())
        } else {
            Err(TranscodeError::format("unexpected end of bmx stream"))
        }
    }

    fn u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.require(&mut b)?;
        Ok(b[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.require(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.require(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.require(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let mut raw = vec![0u8; len];
        self.require(&mut raw)?;
        String::from_utf8(raw).map_err(|_| TranscodeError::format("bmx string is not UTF-8"))
    }

    fn str8(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        self.string(len)
    }

    fn str16(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        self.string(len)
    }
}

/// Little-endian record builder.
#[derive(Default)]
struct RecordWriter(Vec<u8>);

impl RecordWriter {
    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn str8(&mut self, s: &str) -> Result<()> {
        let len = u8::try_from(s.len())
            .map_err(|_| TranscodeError::format(format!("'{s}' is too long for bmx")))?;
        self.u8(len);
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn str16(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len())
            .map_err(|_| TranscodeError::format("bmx metadata entry too long"))?;
        self.u16(len);
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

pub struct BmxReader {
    source: SourceBuffer,
    streams: Vec<StreamDescriptor>,
    metadata: BTreeMap<String, String>,
    packets_seen: Vec<u64>,
    finished: bool,
}

impl BmxReader {
    pub fn open(adapter: InputAdapter, buffer_size: usize) -> Result<Self> {
        let mut source = SourceBuffer::new(adapter, buffer_size);
        let mut magic = [0u8; 4];
        if !source.read_exact(&mut magic)? || &magic != BMX_MAGIC {
            return Err(TranscodeError::format(
                "input is not a bmx stream (bad magic)",
            ));
        }
        let version = source.u16()?;
        if version != VERSION {
            return Err(TranscodeError::format(format!(
                "unsupported bmx version {version}"
            )));
        }

        let mut metadata = BTreeMap::new();
        for _ in 0..source.u16()? {
            let key = source.str16()?;
            let value = source.str16()?;
            metadata.insert(key, value);
        }

        let count = source.u16()? as usize;
        let mut streams = Vec::with_capacity(count);
        for index in 0..count {
            streams.push(read_stream(&mut source, index)?);
        }
        debug!(streams = streams.len(), "bmx header parsed");

        Ok(Self {
            source,
            packets_seen: vec![0; streams.len()],
            streams,
            metadata,
            finished: false,
        })
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn read_trailer(&mut self) -> Result<()> {
        let count = self.source.u16()? as usize;
        for index in 0..count {
            let declared = self.source.u64()?;
            let seen = self.packets_seen.get(index).copied().unwrap_or(0);
            if declared != seen {
                warn!(index, declared, seen, "bmx trailer packet count mismatch");
            }
        }
        Ok(())
    }
}

fn read_rational(source: &mut SourceBuffer, index: usize, what: &str) -> Result<Rational> {
    let (num, den) = (source.i64()?, source.i64()?);
    Rational::checked_new(num, den).ok_or_else(|| {
        TranscodeError::format(format!("stream {index} has invalid {what} {num}/{den}"))
    })
}

fn read_stream(source: &mut SourceBuffer, index: usize) -> Result<StreamDescriptor> {
    let kind = source.u8()?;
    let codec_name = source.str8()?;
    let time_base = read_rational(source, index, "time base")?;
    if !time_base.is_valid() {
        return Err(TranscodeError::format(format!(
            "stream {index} has invalid time base {time_base}"
        )));
    }
    let bit_rate = source.u64()?;
    let media = match kind {
        1 => {
            let channels = source.u16()?;
            let layout = ChannelLayout::from_bits_retain(source.u64()?);
            let sample_rate = source.u32()?;
            let sample_format = source.str8()?.parse().map_err(|_| {
                TranscodeError::format(format!("stream {index} has an unknown sample format"))
            })?;
            let frame_size = source.u32()? as usize;
            MediaParameters::Audio(AudioParameters {
                channels,
                channel_layout: layout,
                sample_rate,
                sample_format,
                frame_size,
            })
        }
        2 => {
            let width = source.u32()?;
            let height = source.u32()?;
            let pixel_format = source.str8()?.parse().map_err(|_| {
                TranscodeError::format(format!("stream {index} has an unknown pixel format"))
            })?;
            let frame_rate = read_rational(source, index, "frame rate")?;
            MediaParameters::Video(VideoParameters {
                width,
                height,
                pixel_format,
                frame_rate,
            })
        }
        3 => MediaParameters::Subtitle,
        _ => MediaParameters::Unknown,
    };
    Ok(StreamDescriptor {
        index,
        parameters: CodecParameters {
            codec_name,
            bit_rate,
            time_base,
            media,
        },
    })
}

impl InputContainer for BmxReader {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.finished {
            return Ok(None);
        }
        let mut tag = [0u8; 1];
        if !self.source.read_exact(&mut tag)? {
            warn!("bmx stream ended without a trailer");
            self.finished = true;
            return Ok(None);
        }
        match tag[0] {
            TAG_PACKET => {}
            TAG_TRAILER => {
                self.read_trailer()?;
                self.finished = true;
                return Ok(None);
            }
            other => {
                return Err(TranscodeError::format(format!(
                    "unknown bmx record tag 0x{other:02x}"
                )));
            }
        }

        let stream_index = self.source.u32()? as usize;
        let pts = self.source.i64()?;
        let dts = self.source.i64()?;
        let duration = self.source.i64()?;
        let flags = PacketFlags::from_bits_retain(self.source.u32()?);
        let size = self.source.u32()? as usize;
        if size > MAX_PACKET_SIZE {
            return Err(TranscodeError::format(format!(
                "bmx packet of {size} bytes exceeds the size limit"
            )));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|err| TranscodeError::exhausted("bmx packet", err))?;
        data.resize(size, 0);
        self.source.require(&mut data)?;

        if let Some(seen) = self.packets_seen.get_mut(stream_index) {
            *seen += 1;
        }
        Ok(Some(Packet {
            stream_index,
            pts,
            dts,
            duration,
            flags,
            data: Bytes::from(data),
        }))
    }
}

/// Engine-owned write buffer drained through the adapter.
struct SinkBuffer {
    adapter: OutputAdapter,
    buf: Vec<u8>,
    capacity: usize,
}

impl SinkBuffer {
    fn new(adapter: OutputAdapter, capacity: usize) -> Self {
        let capacity = capacity.max(16);
        Self {
            adapter,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let room = self.capacity - self.buf.len();
            let n = room.min(bytes.len());
            self.buf.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            if self.buf.len() == self.capacity {
                self.drain()?;
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.adapter.write(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.drain()?;
        self.adapter.flush()
    }
}

pub struct BmxWriter {
    sink: SinkBuffer,
    format: OutputFormat,
    streams: Vec<CodecParameters>,
    queues: Vec<VecDeque<Packet>>,
    last_dts: Vec<i64>,
    packets_written: Vec<u64>,
    interleave: bool,
    max_interleave_delta_us: i64,
    header_written: bool,
    trailer_written: bool,
}

impl BmxWriter {
    pub fn new(adapter: OutputAdapter, format: OutputFormat, buffer_size: usize) -> Self {
        Self {
            sink: SinkBuffer::new(adapter, buffer_size),
            format,
            streams: Vec::new(),
            queues: Vec::new(),
            last_dts: Vec::new(),
            packets_written: Vec::new(),
            interleave: true,
            max_interleave_delta_us: DEFAULT_MAX_INTERLEAVE_DELTA_US,
            header_written: false,
            trailer_written: false,
        }
    }

    fn emit(&mut self, packet: &Packet) -> Result<()> {
        let mut record = RecordWriter::default();
        record.u8(TAG_PACKET);
        record.u32(packet.stream_index as u32);
        record.i64(packet.pts);
        record.i64(packet.dts);
        record.i64(packet.duration);
        record.u32(packet.flags.bits());
        record.u32(packet.data.len() as u32);
        self.sink.write_all(&record.0)?;
        self.sink.write_all(&packet.data)?;
        self.packets_written[packet.stream_index] += 1;
        Ok(())
    }

    /// Sort key in microseconds: dts, falling back to pts.
    fn order_key(&self, packet: &Packet) -> Option<i64> {
        let ts = if packet.dts != NO_PTS { packet.dts } else { packet.pts };
        if ts == NO_PTS {
            return None;
        }
        let tb = self.streams[packet.stream_index].time_base;
        Some(crate::time::rescale(ts, tb, Rational::new(1, 1_000_000)))
    }

    /// Writes queued packets in timestamp order while every stream has
    /// something queued, or unconditionally when `flush_all`.
    fn interleave_out(&mut self, flush_all: bool) -> Result<()> {
        loop {
            let mut earliest: Option<(usize, Option<i64>)> = None;
            let mut latest = i64::MIN;
            let mut all_ready = true;
            for (index, queue) in self.queues.iter().enumerate() {
                let Some(head) = queue.front() else {
                    all_ready = false;
                    continue;
                };
                let key = self.order_key(head);
                if let Some(back) = queue.back().and_then(|p| self.order_key(p)) {
                    latest = latest.max(back);
                }
                let better = match earliest {
                    None => true,
                    Some((_, current)) => match (key, current) {
                        (None, _) => true,
                        (Some(_), None) => false,
                        (Some(k), Some(c)) => k < c,
                    },
                };
                if better {
                    earliest = Some((index, key));
                }
            }
            let Some((index, key)) = earliest else {
                return Ok(());
            };
            let overdue = match key {
                None => true,
                Some(k) => latest.saturating_sub(k) > self.max_interleave_delta_us,
            };
            if !(flush_all || all_ready || overdue) {
                return Ok(());
            }
            if let Some(packet) = self.queues[index].pop_front() {
                self.emit(&packet)?;
            }
        }
    }
}

impl OutputContainer for BmxWriter {
    fn format(&self) -> &OutputFormat {
        &self.format
    }

    fn add_stream(&mut self, parameters: &CodecParameters) -> Result<CodecParameters> {
        if self.header_written {
            return Err(TranscodeError::invalid_state(
                "bmx streams must be declared before the header",
            ));
        }
        if !parameters.time_base.is_valid() {
            return Err(TranscodeError::format(format!(
                "invalid stream time base {}",
                parameters.time_base
            )));
        }
        let mut accepted = parameters.clone();
        accepted.time_base = parameters.time_base.reduce();
        self.streams.push(accepted.clone());
        self.queues.push(VecDeque::new());
        self.last_dts.push(NO_PTS);
        self.packets_written.push(0);
        Ok(accepted)
    }

    fn write_header(&mut self, options: &EngineOptions) -> Result<()> {
        if self.streams.is_empty() {
            return Err(TranscodeError::format("bmx output needs at least one stream"));
        }
        let mut metadata = BTreeMap::new();
        for (key, value) in options {
            match key.as_str() {
                "interleave" => self.interleave = !matches!(value.as_str(), "0" | "false" | "no"),
                "max_interleave_delta" => {
                    self.max_interleave_delta_us = value.parse().map_err(|_| {
                        TranscodeError::format(format!(
                            "max_interleave_delta must be microseconds, got '{value}'"
                        ))
                    })?;
                }
                _ => {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }

        let mut record = RecordWriter::default();
        record.0.extend_from_slice(BMX_MAGIC);
        record.u16(VERSION);
        record.u16(metadata.len() as u16);
        for (key, value) in &metadata {
            record.str16(key)?;
            record.str16(value)?;
        }
        record.u16(self.streams.len() as u16);
        for (index, stream) in self.streams.iter().enumerate() {
            let supported =
                lookup_codec(&stream.codec_name).is_some_and(|codec| codec.kind == stream.kind());
            if !supported {
                return Err(TranscodeError::format(format!(
                    "codec '{}' cannot be stored in bmx stream {index}",
                    stream.codec_name
                )));
            }
            record.u8(kind_code(stream.kind()));
            record.str8(&stream.codec_name)?;
            record.i64(stream.time_base.num);
            record.i64(stream.time_base.den);
            record.u64(stream.bit_rate);
            match &stream.media {
                MediaParameters::Audio(audio) => {
                    record.u16(audio.channels);
                    record.u64(audio.channel_layout.bits());
                    record.u32(audio.sample_rate);
                    record.str8(audio.sample_format.name())?;
                    record.u32(audio.frame_size as u32);
                }
                MediaParameters::Video(video) => {
                    record.u32(video.width);
                    record.u32(video.height);
                    record.str8(video.pixel_format.name())?;
                    record.i64(video.frame_rate.num);
                    record.i64(video.frame_rate.den);
                }
                MediaParameters::Subtitle | MediaParameters::Unknown => {}
            }
        }
        self.sink.write_all(&record.0)?;
        self.header_written = true;
        debug!(
            streams = self.streams.len(),
            interleave = self.interleave,
            "bmx header written"
        );
        Ok(())
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if !self.header_written || self.trailer_written {
            return Err(TranscodeError::invalid_state(
                "bmx packets must be written between header and trailer",
            ));
        }
        let index = packet.stream_index;
        if index >= self.streams.len() {
            return Err(TranscodeError::format(format!(
                "packet addressed to undeclared stream {index}"
            )));
        }
        if !packet.has_ordered_timestamps() {
            return Err(TranscodeError::format(format!(
                "stream {index}: pts {} < dts {}",
                packet.pts, packet.dts
            )));
        }
        if packet.dts != NO_PTS {
            let last = self.last_dts[index];
            if last != NO_PTS && packet.dts < last {
                return Err(TranscodeError::format(format!(
                    "stream {index}: non-monotonic dts {} after {last}",
                    packet.dts
                )));
            }
            self.last_dts[index] = packet.dts;
        }
        if packet.data.len() > MAX_PACKET_SIZE {
            return Err(TranscodeError::format("packet exceeds the bmx size limit"));
        }

        if self.interleave {
            self.queues[index].push_back(packet.clone());
            self.interleave_out(false)
        } else {
            self.emit(packet)
        }
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.trailer_written {
            return Ok(());
        }
        self.interleave_out(true)?;
        let mut record = RecordWriter::default();
        record.u8(TAG_TRAILER);
        record.u16(self.packets_written.len() as u16);
        for count in &self.packets_written {
            record.u64(*count);
        }
        self.sink.write_all(&record.0)?;
        self.sink.flush()?;
        self.trailer_written = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::io::MemorySink;
    use crate::media::SampleFormat;

    fn pcm_stream() -> CodecParameters {
        CodecParameters {
            codec_name: "pcm_u8".into(),
            bit_rate: 0,
            time_base: Rational::new(2, 16_000),
            media: MediaParameters::Audio(AudioParameters {
                channels: 1,
                channel_layout: ChannelLayout::MONO,
                sample_rate: 8_000,
                sample_format: SampleFormat::U8,
                frame_size: 0,
            }),
        }
    }

    fn writer(sink: &MemorySink) -> BmxWriter {
        let format = super::super::lookup_format("bmx").cloned().unwrap();
        BmxWriter::new(OutputAdapter::new(sink.clone()), format, 32)
    }

    fn reader(bytes: Vec<u8>) -> BmxReader {
        BmxReader::open(InputAdapter::from_reader(Cursor::new(bytes)), 32).unwrap()
    }

    fn packet(ts: i64) -> Packet {
        Packet::new(0, vec![ts as u8; 3]).with_timestamps(ts, ts, 3)
    }

    #[test]
    fn header_metadata_and_packets_survive() {
        let sink = MemorySink::new();
        let mut out = writer(&sink);
        let accepted = out.add_stream(&pcm_stream()).unwrap();
        assert_eq!(accepted.time_base, Rational::new(1, 8_000));
        let options = EngineOptions::from([
            ("title".to_string(), "demo".to_string()),
            ("interleave".to_string(), "0".to_string()),
        ]);
        out.write_header(&options).unwrap();
        for ts in [0, 3, 6] {
            out.write_packet(&packet(ts)).unwrap();
        }
        out.write_trailer().unwrap();

        let mut input = reader(sink.contents());
        assert_eq!(input.metadata().get("title").map(String::as_str), Some("demo"));
        assert!(!input.metadata().contains_key("interleave"));
        assert_eq!(input.streams()[0].time_base(), Rational::new(1, 8_000));
        let mut seen = Vec::new();
        while let Some(packet) = input.read_packet().unwrap() {
            seen.push((packet.pts, packet.data[0]));
        }
        assert_eq!(seen, vec![(0, 0), (3, 3), (6, 6)]);
    }

    #[test]
    fn missing_trailer_reads_as_truncated() {
        let sink = MemorySink::new();
        let mut out = writer(&sink);
        out.add_stream(&pcm_stream()).unwrap();
        out.write_header(&EngineOptions::new()).unwrap();
        out.write_packet(&packet(0)).unwrap();
        out.write_trailer().unwrap();
        let mut bytes = sink.contents();
        // drop the 11-byte trailer record
        bytes.truncate(bytes.len() - 11);

        let mut input = reader(bytes);
        assert!(input.read_packet().unwrap().is_some());
        assert!(input.read_packet().unwrap().is_none());
        assert!(input.read_packet().unwrap().is_none());
    }

    #[test]
    fn writer_rejects_backwards_dts_and_foreign_codecs() {
        let sink = MemorySink::new();
        let mut out = writer(&sink);
        out.add_stream(&pcm_stream()).unwrap();
        out.write_header(&EngineOptions::new()).unwrap();
        out.write_packet(&packet(6)).unwrap();
        let err = out.write_packet(&packet(3)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);

        let mut other = writer(&MemorySink::new());
        let mut mislabelled = pcm_stream();
        mislabelled.codec_name = "rawvideo".into();
        other.add_stream(&mislabelled).unwrap();
        assert!(other.write_header(&EngineOptions::new()).is_err());
    }

    #[test]
    fn overflowing_time_base_is_a_format_error() {
        let mut header = Vec::new();
        header.extend_from_slice(BMX_MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes());
        header.push(kind_code(MediaKind::Audio));
        header.push(6);
        header.extend_from_slice(b"pcm_u8");
        header.extend_from_slice(&i64::MIN.to_le_bytes());
        header.extend_from_slice(&(-1i64).to_le_bytes());

        let err = BmxReader::open(InputAdapter::from_reader(Cursor::new(header)), 32)
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
        assert!(err.to_string().contains("time base"));
    }

    #[test]
    fn garbage_is_not_a_bmx_stream() {
        let result = BmxReader::open(
            InputAdapter::from_reader(Cursor::new(b"RIFF....".to_vec())),
            32,
        );
        assert!(result.is_err());
    }
}
