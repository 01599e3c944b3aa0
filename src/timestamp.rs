//! Packet timestamp reconciliation between timebases.

use tracing::trace;

use crate::chain::{Consumer, Outlet, Producer};
use crate::error::Result;
use crate::media::Packet;
use crate::time::{NO_PTS, Rational, rescale};

/// Rewrites `pts`, `dts` and `duration` of `packet` from `from` to `to`.
/// Unknown values stay unknown.
pub fn rescale_packet(packet: &mut Packet, from: Rational, to: Rational) {
    if same_time_base(from, to) {
        return;
    }
    packet.pts = rescale(packet.pts, from, to);
    packet.dts = rescale(packet.dts, from, to);
    if packet.duration > 0 {
        packet.duration = rescale(packet.duration, from, to);
    }
}

fn same_time_base(a: Rational, b: Rational) -> bool {
    a == b || a.reduce() == b.reduce()
}

/// Maps packets from one timebase to another, optionally re-addressing
/// them to a different output stream. Used after encoders and on the
/// stream-copy path.
pub struct TimestampScaler {
    from: Rational,
    to: Rational,
    stream_index: Option<usize>,
    outlet: Outlet<Packet>,
}

impl TimestampScaler {
    pub fn new(from: Rational, to: Rational) -> Self {
        Self {
            from,
            to,
            stream_index: None,
            outlet: Outlet::new(),
        }
    }

    pub fn with_stream_index(mut self, index: usize) -> Self {
        self.stream_index = Some(index);
        self
    }

    /// True when packets pass through without any rewrite.
    pub fn is_identity(&self) -> bool {
        same_time_base(self.from, self.to) && self.stream_index.is_none()
    }
}

impl Producer<Packet> for TimestampScaler {
    fn outlet(&mut self) -> &mut Outlet<Packet> {
        &mut self.outlet
    }
}

impl Consumer<Packet> for TimestampScaler {
    fn accept(&mut self, packet: &Packet) -> Result<()> {
        if self.is_identity() {
            return self.outlet.publish(packet);
        }
        let mut mapped = packet.clone();
        rescale_packet(&mut mapped, self.from, self.to);
        if let Some(index) = self.stream_index {
            mapped.stream_index = index;
        }
        trace!(
            from = packet.pts,
            to = mapped.pts,
            stream = mapped.stream_index,
            "packet rescaled"
        );
        self.outlet.publish(&mapped)
    }

    fn finish(&mut self) -> Result<()> {
        self.outlet.finish()
    }
}

/// Assigns `pts = dts = running total of durations`.
///
/// Used behind audio encoders fed by a re-blocking FIFO, where the original
/// frame boundaries no longer exist.
pub struct AudioTimestamper {
    next: i64,
    outlet: Outlet<Packet>,
}

impl Default for AudioTimestamper {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTimestamper {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(start: i64) -> Self {
        Self {
            next: start,
            outlet: Outlet::new(),
        }
    }

    pub fn next_timestamp(&self) -> i64 {
        self.next
    }
}

impl Producer<Packet> for AudioTimestamper {
    fn outlet(&mut self) -> &mut Outlet<Packet> {
        &mut self.outlet
    }
}

impl Consumer<Packet> for AudioTimestamper {
    fn accept(&mut self, packet: &Packet) -> Result<()> {
        let mut stamped = packet.clone();
        stamped.pts = self.next;
        stamped.dts = self.next;
        if stamped.duration != NO_PTS && stamped.duration > 0 {
            self.next += stamped.duration;
        }
        self.outlet.publish(&stamped)
    }

    fn finish(&mut self) -> Result<()> {
        self.outlet.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{FnConsumer, Shared};

    fn record<P: Producer<Packet>>(producer: &mut P) -> Shared<Vec<Packet>> {
        let seen = Shared::new(Vec::new());
        let sink = seen.clone();
        producer.outlet().connect(FnConsumer(move |p: &Packet| -> Result<()> {
            sink.lock()?.push(p.clone());
            Ok(())
        }));
        seen
    }

    #[test]
    fn equal_time_bases_pass_through() {
        let tb = Rational::new(1, 48_000);
        let mut scaler = TimestampScaler::new(tb, tb);
        assert!(scaler.is_identity());
        let seen = record(&mut scaler);
        let packet = Packet::new(2, vec![1u8]).with_timestamps(1_001, 1_000, 7);
        scaler.accept(&packet).unwrap();
        let seen = seen.lock().unwrap();
        let out = &seen[0];
        assert_eq!((out.stream_index, out.pts, out.dts, out.duration), (2, 1_001, 1_000, 7));
    }

    #[test]
    fn rescales_and_readdresses() {
        let mut scaler = TimestampScaler::new(Rational::new(1, 90_000), Rational::new(1, 1000))
            .with_stream_index(0);
        let seen = record(&mut scaler);
        scaler
            .accept(&Packet::new(3, vec![0u8]).with_timestamps(3_045, 3_000, 3_000))
            .unwrap();
        scaler
            .accept(&Packet::new(3, vec![0u8]).with_timestamps(NO_PTS, NO_PTS, 0))
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(
            (seen[0].stream_index, seen[0].pts, seen[0].dts, seen[0].duration),
            (0, 34, 33, 33)
        );
        assert_eq!((seen[1].pts, seen[1].dts), (NO_PTS, NO_PTS));
    }

    #[test]
    fn reduced_time_bases_count_as_equal() {
        let mut packet = Packet::new(0, vec![0u8]).with_timestamps(5, 5, 1);
        rescale_packet(&mut packet, Rational::new(2, 60), Rational::new(1, 30));
        assert_eq!((packet.pts, packet.dts, packet.duration), (5, 5, 1));
    }

    #[test]
    fn regenerated_timestamps_are_gap_free() {
        let mut stamper = AudioTimestamper::new();
        let seen = record(&mut stamper);
        for (pts, duration) in [(900, 960), (NO_PTS, 960), (17, 192)] {
            stamper
                .accept(&Packet::new(0, vec![0u8]).with_timestamps(pts, pts, duration))
                .unwrap();
        }
        let stamps: Vec<(i64, i64)> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.pts, p.dts))
            .collect();
        assert_eq!(stamps, vec![(0, 0), (960, 960), (1920, 1920)]);
        assert_eq!(stamper.next_timestamp(), 2112);
    }
}
