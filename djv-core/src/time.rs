//! # Timestamps and Time Bases
//!
//! Every timestamp that crosses a thread boundary is expressed in the fixed
//! internal time base of 1/1,000,000 s. Stream-native timestamps only exist
//! inside the decode worker and are converted here with exact rational
//! arithmetic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ticks of the internal time base (microseconds).
pub type Timestamp = i64;

/// Ticks per second of the internal time base.
pub const TICKS_PER_SECOND: i64 = 1_000_000;

/// Reserved "nothing pending / not applicable" value.
pub const NO_TIMESTAMP: Timestamp = -1;

/// The internal time base as a rational.
pub const INTERNAL_TIME_BASE: Rational = Rational::new(1, TICKS_PER_SECOND as i32);

// ============================================================================
// Rational
// ============================================================================

/// A rational number, used both for stream time bases (seconds per tick) and
/// frame rates (frames per second).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Swap numerator and denominator (frame rate <-> frame duration).
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num != 0 && self.den != 0
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Rescaling
// ============================================================================

/// Rescale `value` from time base `from` to time base `to`.
///
/// Computes `value * from.num * to.den / (from.den * to.num)` in 128-bit
/// integers and rounds to nearest, halves away from zero. A degenerate time
/// base yields 0.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    let rounded = if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Stream-native ticks to internal [`Timestamp`].
pub fn to_internal(value: i64, from: Rational) -> Timestamp {
    rescale(value, from, INTERNAL_TIME_BASE)
}

/// Internal [`Timestamp`] to stream-native ticks.
pub fn from_internal(value: Timestamp, to: Rational) -> i64 {
    rescale(value, INTERNAL_TIME_BASE, to)
}

pub fn to_seconds(value: Timestamp) -> f64 {
    value as f64 / TICKS_PER_SECOND as f64
}

pub fn from_seconds(value: f64) -> Timestamp {
    (value * TICKS_PER_SECOND as f64) as Timestamp
}

/// Duration of a stream in internal ticks.
///
/// Uses the stream's own duration when it has one, then the container-level
/// duration (already internal), then 0.
pub fn stream_duration(
    stream_duration: Option<i64>,
    time_base: Rational,
    container_duration: Option<Timestamp>,
) -> Timestamp {
    match (stream_duration, container_duration) {
        (Some(d), _) => to_internal(d, time_base),
        (None, Some(d)) => d,
        (None, None) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_exact() {
        // 10 frames at 1/24 s
        assert_eq!(to_internal(10, Rational::new(1, 24)), 416_667);
        assert_eq!(to_internal(90_000, Rational::new(1, 90_000)), 1_000_000);
        assert_eq!(from_internal(1_000_000, Rational::new(1, 48_000)), 48_000);
        assert_eq!(to_internal(-3, Rational::new(1, 2)), -1_500_000);
    }

    #[test]
    fn test_rescale_no_float_drift() {
        // Eight hours of 1001/30000 ticks stays exact.
        let tb = Rational::new(1001, 30000);
        let frames = 8 * 3600 * 30;
        let expected = (frames as i128 * 1001 * 1_000_000 + 15_000) / 30_000;
        assert_eq!(to_internal(frames, tb) as i128, expected);
    }

    #[test]
    fn test_round_trip_within_one_tick() {
        let bases = [
            Rational::new(1, 24),
            Rational::new(1, 25),
            Rational::new(1001, 30000),
            Rational::new(1, 90_000),
            Rational::new(1, 44_100),
            Rational::new(1, 1000),
            Rational::new(3, 7),
        ];
        for tb in bases {
            for value in [0_i64, 1, 2, 17, 1000, 123_456, 9_999_999, -42] {
                let internal = to_internal(value, tb);
                let back = from_internal(internal, tb);
                let again = to_internal(back, tb);
                assert!(
                    (again - internal).abs() <= 1,
                    "{} in {} -> {} -> {} -> {}",
                    value,
                    tb,
                    internal,
                    back,
                    again
                );
                // Coarser than the internal base: exact recovery.
                if (tb.num as i64) * TICKS_PER_SECOND >= tb.den as i64 {
                    assert_eq!(back, value, "{} in {}", value, tb);
                }
            }
        }
    }

    #[test]
    fn test_seconds() {
        assert_eq!(from_seconds(1.5), 1_500_000);
        assert_eq!(to_seconds(250_000), 0.25);
        assert_eq!(to_seconds(NO_TIMESTAMP), -0.000001);
    }

    #[test]
    fn test_stream_duration_fallback() {
        let tb = Rational::new(1, 24);
        assert_eq!(stream_duration(Some(48), tb, Some(5)), 2_000_000);
        assert_eq!(stream_duration(None, tb, Some(3_000_000)), 3_000_000);
        assert_eq!(stream_duration(None, tb, None), 0);
    }

    #[test]
    fn test_degenerate_time_base() {
        assert_eq!(rescale(10, Rational::new(1, 24), Rational::new(0, 1)), 0);
        assert!(!Rational::default().is_valid());
        assert_eq!(Rational::new(24, 1).invert(), Rational::new(1, 24));
    }
}
