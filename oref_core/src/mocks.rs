//! Test and helper mocks for oref_core

use oref_traits::{BasalRounder, CarbRatioLookup, Timestamp};

use crate::builder::ProfileDefault;
use crate::config::Profile;

pub use oref_traits::FixedClock;

/// Rounds every rate to a fixed step (U/hr).
#[derive(Debug, Clone, Copy)]
pub struct FixedRateRounder(pub f64);

impl BasalRounder for FixedRateRounder {
    fn round_basal(&self, rate: f64) -> f64 {
        (rate / self.0).round() * self.0
    }
}

impl ProfileDefault for FixedRateRounder {
    fn from_profile(_: &Profile) -> Self {
        Self(0.05)
    }
}

/// Same carb ratio at every time of day; `None` simulates a missing entry.
#[derive(Debug, Clone, Copy)]
pub struct ConstantCarbRatio(pub Option<f64>);

impl CarbRatioLookup for ConstantCarbRatio {
    fn carb_ratio(&self, _at: Timestamp) -> Option<f64> {
        self.0
    }
}

impl ProfileDefault for ConstantCarbRatio {
    fn from_profile(profile: &Profile) -> Self {
        Self(Some(profile.carb_ratio))
    }
}
