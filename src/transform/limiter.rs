use tracing::{debug, trace};

use crate::chain::{Consumer, Outlet, Producer};
use crate::error::{Result, TranscodeError};
use crate::media::Frame;
use crate::observability::{FRAMES_RATE_DROPPED, MetricsCollector};
use crate::time::{NO_PTS, Rational, gcd_u128, rescale};

/// Drops frames so the stream plays at `target_fps`.
///
/// `source_fps / target_fps` is reduced to `num/den`; a frame with nominal
/// index `n` is kept when `n mod num < den`. The last kept frame of each
/// window absorbs the span of the dropped frames after it, so the decimated
/// stream stays gap-free without overlapping frames.
pub struct RateLimiter {
    source_fps: Rational,
    target_fps: Rational,
    time_base: Rational,
    ratio_num: i64,
    ratio_den: i64,
    counter: i64,
    kept: u64,
    dropped: u64,
    metrics: Option<MetricsCollector>,
    outlet: Outlet<Frame>,
}

impl RateLimiter {
    /// Whether decimation is needed at all.
    pub fn needed(source_fps: Rational, target_fps: Rational) -> bool {
        source_fps.is_valid() && target_fps.is_valid() && target_fps < source_fps
    }

    /// `time_base` is the unit of the incoming frame timestamps.
    pub fn new(source_fps: Rational, target_fps: Rational, time_base: Rational) -> Result<Self> {
        if !source_fps.is_valid() || !target_fps.is_valid() {
            return Err(TranscodeError::unsupported_conversion(format!(
                "cannot limit {source_fps} fps to {target_fps} fps"
            )));
        }
        if !time_base.is_valid() {
            return Err(TranscodeError::invalid_state(format!(
                "rate limiter needs a valid time base, got {time_base}"
            )));
        }
        let (ratio_num, ratio_den) = reduced_ratio(source_fps, target_fps).ok_or_else(|| {
            TranscodeError::unsupported_conversion(format!(
                "{source_fps} fps to {target_fps} fps has no representable frame ratio"
            ))
        })?;
        debug!(
            source = %source_fps,
            target = %target_fps,
            keep = ratio_den,
            every = ratio_num,
            "rate limiter configured"
        );
        Ok(Self {
            source_fps,
            target_fps,
            time_base,
            ratio_num,
            ratio_den,
            counter: 0,
            kept: 0,
            dropped: 0,
            metrics: None,
            outlet: Outlet::new(),
        })
    }

    /// Counts dropped frames into `metrics` as well.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `(num, den)` with `num/den = source/target` in lowest terms.
    pub fn ratio(&self) -> (i64, i64) {
        (self.ratio_num, self.ratio_den)
    }

    pub fn target_fps(&self) -> Rational {
        self.target_fps
    }

    pub fn frames_kept(&self) -> u64 {
        self.kept
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }

    pub fn should_keep(&self, index: i64) -> bool {
        index.rem_euclid(self.ratio_num) < self.ratio_den
    }

    /// `round(ts_seconds * source_fps)`, or the running frame count when the
    /// frame carries no timestamp.
    fn nominal_index(&self, frame: &Frame) -> i64 {
        match frame.timestamp() {
            NO_PTS => self.counter,
            ts => rescale(ts, self.time_base, self.source_fps.invert()),
        }
    }
}

fn reduced_ratio(source: Rational, target: Rational) -> Option<(i64, i64)> {
    let num = source.num.unsigned_abs() as u128 * target.den.unsigned_abs() as u128;
    let den = source.den.unsigned_abs() as u128 * target.num.unsigned_abs() as u128;
    let g = gcd_u128(num, den);
    Some((i64::try_from(num / g).ok()?, i64::try_from(den / g).ok()?))
}

impl Producer<Frame> for RateLimiter {
    fn outlet(&mut self) -> &mut Outlet<Frame> {
        &mut self.outlet
    }
}

impl Consumer<Frame> for RateLimiter {
    fn accept(&mut self, frame: &Frame) -> Result<()> {
        let index = self.nominal_index(frame);
        self.counter += 1;
        if !self.should_keep(index) {
            self.dropped += 1;
            if let Some(metrics) = &self.metrics {
                metrics.increment(FRAMES_RATE_DROPPED, 1);
            }
            trace!(index, pts = frame.pts, "frame dropped");
            return Ok(());
        }
        self.kept += 1;
        let closes_window = index.rem_euclid(self.ratio_num) == self.ratio_den - 1;
        if closes_window && self.ratio_num > self.ratio_den && frame.duration > 0 {
            let mut stretched = frame.clone();
            stretched.duration = frame
                .duration
                .saturating_mul(self.ratio_num - self.ratio_den + 1);
            self.outlet.publish(&stretched)
        } else {
            self.outlet.publish(frame)
        }
    }

    fn finish(&mut self) -> Result<()> {
        debug!(
            kept = self.kept,
            dropped = self.dropped,
            "rate limiter finished"
        );
        self.outlet.finish()
    }
}
