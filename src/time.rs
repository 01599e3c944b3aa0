//! Rational timebases and timestamp rescaling.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Result, TranscodeError};

/// Reserved value for a timestamp that is not known. Never zero.
pub const NO_PTS: i64 = i64::MIN;

/// A rational number of seconds (timebases) or of events per second (rates).
///
/// The denominator is kept positive; the value is not reduced automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    /// Normalises the sign onto the numerator. A denominator of `i64::MIN`
    /// saturates; use [`Rational::checked_new`] for untrusted input.
    pub const fn new(num: i64, den: i64) -> Self {
        if den < 0 {
            Self {
                num: num.saturating_neg(),
                den: den.saturating_neg(),
            }
        } else {
            Self { num, den }
        }
    }

    /// Like [`Rational::new`], but `None` when the sign cannot be normalised
    /// without overflow.
    pub const fn checked_new(num: i64, den: i64) -> Option<Self> {
        if den >= 0 {
            return Some(Self { num, den });
        }
        match (num.checked_neg(), den.checked_neg()) {
            (Some(num), Some(den)) => Some(Self { num, den }),
            _ => None,
        }
    }

    pub const fn from_int(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    /// Strictly positive numerator and denominator.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn reduce(&self) -> Self {
        if self.num == 0 {
            return Self { num: 0, den: 1 };
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs()) as i64;
        Self::new(self.num / g, self.den / g)
    }

    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim().parse::<i64>().map_err(|err| {
                TranscodeError::InvalidState(format!("invalid rational '{s}': {err}"))
            })
        };
        let value = match s.split_once('/') {
            Some((num, den)) => Rational::new(parse(num)?, parse(den)?),
            None => Rational::from_int(parse(s)?),
        };
        if value.den == 0 {
            return Err(TranscodeError::InvalidState(format!(
                "invalid rational '{s}': zero denominator"
            )));
        }
        Ok(value)
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.den == 1 {
            serializer.serialize_i64(self.num)
        } else {
            serializer.collect_str(self)
        }
    }
}

impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RationalVisitor;

        impl Visitor<'_> for RationalVisitor {
            type Value = Rational;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an integer or a \"num/den\" string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Rational, E> {
                Ok(Rational::from_int(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Rational, E> {
                i64::try_from(v)
                    .map(Rational::from_int)
                    .map_err(|_| E::custom("rational out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Rational, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RationalVisitor)
    }
}

pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

pub fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

/// Computes `value * mul / div` rounding half away from zero, clamped to the
/// representable range minus the [`NO_PTS`] sentinel.
///
/// `mul` and `div` must fit in 127 bits, which holds for any product of two
/// `i64` timebase terms.
pub fn rescale_rounded(value: i64, mul: i128, div: i128) -> i64 {
    if div == 0 {
        return NO_PTS;
    }
    let g = gcd_u128(mul.unsigned_abs(), div.unsigned_abs()) as i128;
    let (mut mul, mut div) = (mul / g, div / g);
    if div < 0 {
        mul = -mul;
        div = -div;
    }
    let Some(n) = (value as i128).checked_mul(mul) else {
        return if (value < 0) != (mul < 0) {
            i64::MIN + 1
        } else {
            i64::MAX
        };
    };
    let (quotient, remainder) = (n / div, n % div);
    let remainder = remainder.unsigned_abs();
    let q = if remainder >= div.unsigned_abs() - remainder {
        quotient + n.signum()
    } else {
        quotient
    };
    q.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
}

/// Maps a timestamp between timebases. Unknown stays unknown and identical
/// timebases return the input untouched.
pub fn rescale(ts: i64, from: Rational, to: Rational) -> i64 {
    if ts == NO_PTS || from == to {
        return ts;
    }
    if !from.is_valid() || !to.is_valid() {
        return NO_PTS;
    }
    rescale_rounded(
        ts,
        from.num as i128 * to.den as i128,
        from.den as i128 * to.num as i128,
    )
}

/// Renders a timestamp as `HH:MM:SS.mmm`, or `none` when unknown.
pub fn format_hms(ts: i64, time_base: Rational) -> String {
    if ts == NO_PTS || !time_base.is_valid() {
        return "none".to_string();
    }
    let millis = rescale(ts, time_base, Rational::new(1, 1000));
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    format!(
        "{sign}{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        (millis / 60_000) % 60,
        (millis / 1000) % 60,
        millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rescale_is_untouched() {
        let tb = Rational::new(1, 90_000);
        for ts in [0, 1, -7, 123_456_789, i64::MAX, i64::MIN + 1] {
            assert_eq!(rescale(ts, tb, tb), ts);
        }
    }

    #[test]
    fn unknown_passes_through() {
        assert_eq!(
            rescale(NO_PTS, Rational::new(1, 30), Rational::new(1, 1000)),
            NO_PTS
        );
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let from = Rational::new(1, 2);
        let to = Rational::new(1, 1);
        assert_eq!(rescale(1, from, to), 1);
        assert_eq!(rescale(-1, from, to), -1);
        assert_eq!(rescale(3, from, to), 2);
        assert_eq!(rescale(-3, from, to), -2);
        assert_eq!(rescale(1, Rational::new(1, 30), Rational::new(1, 10)), 0);
        assert_eq!(rescale(2, Rational::new(1, 30), Rational::new(1, 10)), 1);
    }

    #[test]
    fn round_trip_stays_within_one_tick() {
        let a = Rational::new(1, 48_000);
        let b = Rational::new(1, 1000);
        for ts in (0..200_000).step_by(317) {
            let there = rescale(ts, a, b);
            let back = rescale(there, b, a);
            assert!((back - ts).abs() <= 24, "ts {ts} came back as {back}");
        }
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        let from = Rational::new(1, 1);
        let to = Rational::new(1, 1_000_000);
        assert_eq!(rescale(i64::MAX / 2, from, to), i64::MAX);
        assert_eq!(rescale(i64::MIN / 2, from, to), i64::MIN + 1);
    }

    #[test]
    fn extreme_timebases_saturate() {
        let huge = Rational::new(i64::MAX, 1);
        let tiny = Rational::new(1, i64::MAX);
        assert_eq!(rescale(i64::MAX / 2, huge, tiny), i64::MAX);
        assert_eq!(rescale(-(i64::MAX / 2), huge, tiny), i64::MIN + 1);
        assert_eq!(rescale(i64::MAX - 1, tiny, huge), 0);
        // common factors cancel before multiplying
        assert_eq!(rescale_rounded(i64::MAX, i64::MAX as i128, i64::MAX as i128), i64::MAX);
    }

    #[test]
    fn sign_normalisation_never_overflows() {
        assert_eq!(Rational::checked_new(i64::MIN, -1), None);
        assert_eq!(Rational::checked_new(1, i64::MIN), None);
        assert_eq!(Rational::checked_new(3, -4), Some(Rational::new(-3, 4)));
        assert_eq!(Rational::new(i64::MIN, -1), Rational::new(i64::MAX, 1));
    }

    #[test]
    fn parses_and_orders() {
        let ntsc: Rational = "30000/1001".parse().unwrap();
        assert_eq!(ntsc, Rational::new(30000, 1001));
        assert!(ntsc < Rational::from_int(30));
        assert!("25".parse::<Rational>().unwrap() > ntsc.invert());
        assert!("1/0".parse::<Rational>().is_err());
        assert_eq!(Rational::new(6, -4).reduce(), Rational::new(-3, 2));
    }

    #[test]
    fn hms_rendering() {
        assert_eq!(format_hms(NO_PTS, Rational::new(1, 1000)), "none");
        assert_eq!(
            format_hms(3_723_500, Rational::new(1, 1000)),
            "01:02:03.500"
        );
    }
}
