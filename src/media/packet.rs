use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::time::NO_PTS;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// Packet starts a decodable unit on its own.
        const KEY = 0x0001;
        const CORRUPT = 0x0002;
        const DISCARD = 0x0004;
    }
}

/// A compressed chunk of one elementary stream.
///
/// `pts`, `dts` and `duration` are expressed in the timebase of the stream
/// named by `stream_index`. Unknown timestamps hold [`NO_PTS`]; a zero
/// duration means the duration is unknown.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub flags: PacketFlags,
    pub data: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, data: impl Into<Bytes>) -> Self {
        Self {
            stream_index,
            pts: NO_PTS,
            dts: NO_PTS,
            duration: 0,
            flags: PacketFlags::KEY,
            data: data.into(),
        }
    }

    pub fn with_timestamps(mut self, pts: i64, dts: i64, duration: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self.duration = duration;
        self
    }

    pub fn is_key(&self) -> bool {
        self.flags.contains(PacketFlags::KEY)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `dts <= pts` whenever both are known.
    pub fn has_ordered_timestamps(&self) -> bool {
        self.pts == NO_PTS || self.dts == NO_PTS || self.dts <= self.pts
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("duration", &self.duration)
            .field("flags", &self.flags)
            .field("size", &self.data.len())
            .finish()
    }
}
