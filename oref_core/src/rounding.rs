//! Pump-deliverable rounding of basal rates and insulin amounts.

use oref_traits::BasalRounder;

use crate::util::round_to;

/// Default [`BasalRounder`]: basal resolution depends on the rate band and,
/// below 1 U/hr, on the pump model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpRounding {
    model: Option<String>,
}

impl PumpRounding {
    pub fn new(model: Option<String>) -> Self {
        Self { model }
    }

    /// Models ending in "54" or "23" deliver 0.025 U/hr steps below 1 U/hr.
    fn fine_low_range(&self) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.ends_with("54") || m.ends_with("23"))
    }
}

impl BasalRounder for PumpRounding {
    fn round_basal(&self, rate: f64) -> f64 {
        let per_unit = if rate < 1.0 {
            if self.fine_low_range() { 40.0 } else { 20.0 }
        } else if rate < 10.0 {
            20.0
        } else {
            10.0
        };
        round_to(round_to(rate * per_unit, 0) / per_unit, 3)
    }
}

/// Floor an insulin amount to whole pump increments.
///
/// - The configured increment is honored when it is 0.025 or 0.1 U; any
///   other value falls back to 0.05 U.
/// - Amounts smaller than one increment count as zero.
#[inline]
pub fn account_for_increments(insulin: f64, bolus_increment: f64) -> f64 {
    let step = if (bolus_increment - 0.025).abs() < 1e-9 || (bolus_increment - 0.1).abs() < 1e-9 {
        bolus_increment
    } else {
        0.05
    };
    let increments = insulin / step;
    if increments >= 1.0 {
        round_to(increments.floor() * step, 5)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_by_rate_band() {
        let r = PumpRounding::default();
        assert_eq!(r.round_basal(0.83), 0.85);
        assert_eq!(r.round_basal(4.2), 4.2);
        assert_eq!(r.round_basal(4.23), 4.25);
        assert_eq!(r.round_basal(12.34), 12.3);
    }

    #[test]
    fn fine_models_use_quarter_tenths_below_one() {
        let r = PumpRounding::new(Some("554".into()));
        assert_eq!(r.round_basal(0.83), 0.825);
        assert_eq!(r.round_basal(1.83), 1.85);
    }

    #[test]
    fn increments_floor_and_drop_partials() {
        assert_eq!(account_for_increments(1.234, 0.1), 1.2);
        assert_eq!(account_for_increments(0.04, 0.05), 0.0);
        assert_eq!(account_for_increments(0.06, 0.025), 0.05);
        assert_eq!(account_for_increments(0.33, 0.2), 0.3);
    }
}
