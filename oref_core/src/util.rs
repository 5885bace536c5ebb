//! Numeric helpers shared by the core modules.

use core::fmt;

/// Lowest glucose value any prediction may report (mg/dL).
pub const BG_FLOOR: f64 = 39.0;
/// Highest glucose value any prediction may report (mg/dL).
pub const BG_CEILING: f64 = 401.0;
/// mg/dL to mmol/L conversion factor used for display.
pub const MMOL_PER_MGDL: f64 = 0.0555;

/// Round to `digits` decimals, halves toward positive infinity.
///
/// - `round_to(-2.5, 0) == -2.0`, `round_to(2.5, 0) == 3.0`
#[inline]
pub fn round_to(value: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (value * scale + 0.5).floor() / scale
}

/// Round to a whole number, halves toward positive infinity.
#[inline]
pub fn round0(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Clamp a predicted glucose value into the reportable band and round it.
#[inline]
pub fn clamp_bg(value: f64) -> f64 {
    round0(value.max(BG_FLOOR).min(BG_CEILING))
}

/// Fractional minutes between two instants, `later - earlier`.
#[inline]
pub fn minutes_between(later: oref_traits::Timestamp, earlier: oref_traits::Timestamp) -> f64 {
    later.signed_duration_since(earlier).num_milliseconds() as f64 / 60_000.0
}

/// Display adapter printing a number the way the reason trail expects:
/// shortest round-trip form, no trailing `.0`, no negative zero.
#[derive(Debug, Clone, Copy)]
pub struct Num(pub f64);

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        if v == 0.0 {
            return f.write_str("0");
        }
        if v.is_infinite() {
            return f.write_str(if v > 0.0 { "Infinity" } else { "-Infinity" });
        }
        write!(f, "{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_halves_upward() {
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(-2.5, 0), -2.0);
        assert_eq!(round_to(1.005, 1), 1.0);
        assert_eq!(round_to(4.2049, 2), 4.2);
    }

    #[test]
    fn clamps_predictions() {
        assert_eq!(clamp_bg(12.0), 39.0);
        assert_eq!(clamp_bg(450.0), 401.0);
        assert_eq!(clamp_bg(120.4), 120.0);
    }

    #[test]
    fn num_formats_like_the_trail() {
        assert_eq!(Num(4.0).to_string(), "4");
        assert_eq!(Num(-0.0).to_string(), "0");
        assert_eq!(Num(0.25).to_string(), "0.25");
    }
}
