//! Rational time bases and timestamp rescaling.

use std::fmt;

/// Timestamp value meaning "no timestamp". Passed through rescaling unchanged.
pub const NOPTS: i64 = i64::MIN;

/// A time base expressed as `num / den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// Numerator.
    pub num: i32,
    /// Denominator.
    pub den: i32,
}

impl Rational {
    /// Millisecond ticks; the time base of submitted frames and video encoders.
    pub const MILLIS: Self = Self::new(1, 1000);

    /// Creates a time base.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Rescales `ts` from `from` ticks to `to` ticks, rounding to nearest
    /// with halves away from zero.
    ///
    /// `i64::MIN` and `i64::MAX` pass through unchanged, as does every value
    /// when either base is degenerate.
    pub fn rescale(ts: i64, from: Self, to: Self) -> i64 {
        if ts == NOPTS || ts == i64::MAX || from == to {
            return ts;
        }

        let num = i128::from(ts) * i128::from(from.num) * i128::from(to.den);
        let den = i128::from(from.den) * i128::from(to.num);
        if den == 0 {
            return ts;
        }
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };

        let magnitude = (num.abs() * 2 + den) / (den * 2);
        let scaled = if num < 0 { -magnitude } else { magnitude };
        i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN + 1 } else { i64::MAX - 1 })
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        assert_eq!(Rational::rescale(1234, Rational::MILLIS, Rational::MILLIS), 1234);
    }

    #[test]
    fn test_millis_to_90khz() {
        let mpegts = Rational::new(1, 90_000);
        assert_eq!(Rational::rescale(1, Rational::MILLIS, mpegts), 90);
        assert_eq!(Rational::rescale(-2, Rational::MILLIS, mpegts), -180);
    }

    #[test]
    fn test_rounds_half_away_from_zero() {
        let half_ms = Rational::new(1, 2000);
        // 3 half-milliseconds = 1.5ms
        assert_eq!(Rational::rescale(3, half_ms, Rational::MILLIS), 2);
        assert_eq!(Rational::rescale(-3, half_ms, Rational::MILLIS), -2);
        // 1.25ms rounds down
        assert_eq!(Rational::rescale(5, Rational::new(1, 4000), Rational::MILLIS), 1);
    }

    #[test]
    fn test_nopts_passthrough() {
        let to = Rational::new(1, 48_000);
        assert_eq!(Rational::rescale(NOPTS, Rational::MILLIS, to), NOPTS);
        assert_eq!(Rational::rescale(i64::MAX, Rational::MILLIS, to), i64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rational::new(1, 44_100).to_string(), "1/44100");
    }
}
