//! Collaborator seams for the decision core.
//!
//! The core never reads the wall clock, rounds pump rates, or looks up carb
//! ratios on its own; callers hand it implementations of these traits.
pub mod clock;

pub use clock::{Clock, FixedClock, SystemClock, Timestamp};

/// Rounds a basal rate to what the pump can actually deliver.
pub trait BasalRounder {
    fn round_basal(&self, rate: f64) -> f64;
}

/// Carb ratio (grams per unit) in force at a given time of day.
pub trait CarbRatioLookup {
    fn carb_ratio(&self, at: Timestamp) -> Option<f64>;
}

impl<T: BasalRounder + ?Sized> BasalRounder for &T {
    fn round_basal(&self, rate: f64) -> f64 {
        (**self).round_basal(rate)
    }
}

impl<T: CarbRatioLookup + ?Sized> CarbRatioLookup for &T {
    fn carb_ratio(&self, at: Timestamp) -> Option<f64> {
        (**self).carb_ratio(at)
    }
}
