//! Safety-clamped temp basal application.
//!
//! Every branch of the engine that wants a temp basal goes through
//! [`TempBasalSetter::apply`], which enforces the safe ceiling, the ketosis
//! floor and the "no change necessary" rule.

use oref_traits::BasalRounder;

use crate::config::{KetoSettings, Profile};
use crate::decision::TempBasalRequest;
use crate::reason::ReasonEvent;
use crate::types::CurrentTemp;

/// Highest temp basal ever set:
/// `min(max_basal, mult_daily * max_daily_basal, mult_current * current_basal)`.
pub fn max_safe_basal(profile: &Profile) -> f64 {
    profile
        .max_basal
        .min(profile.max_daily_safety_multiplier * profile.max_daily_basal)
        .min(profile.current_basal_safety_multiplier * profile.current_basal)
}

pub struct TempBasalSetter<'a, R> {
    profile: &'a Profile,
    keto: &'a KetoSettings,
    skip_neutral_temps: bool,
    rounder: &'a R,
    max_safe: f64,
}

impl<'a, R: BasalRounder> TempBasalSetter<'a, R> {
    pub fn new(profile: &'a Profile, keto: &'a KetoSettings, skip_neutral_temps: bool, rounder: &'a R) -> Self {
        Self {
            profile,
            keto,
            skip_neutral_temps,
            rounder,
            max_safe: max_safe_basal(profile),
        }
    }

    pub fn max_safe(&self) -> f64 {
        self.max_safe
    }

    /// Ketosis-protection floor for this cycle, if one applies.
    fn keto_floor(&self, rec: &TempBasalRequest) -> (Option<f64>, Option<ReasonEvent>) {
        let k = self.keto;
        if !k.enabled && !k.variable {
            return (None, None);
        }
        let basal = self.profile.current_basal;
        let cutoff = if k.absolute {
            k.basal_absolute.clamp(0.0, 2.0)
        } else {
            basal * (k.basal_percent * 100.0).clamp(5.0, 50.0) / 100.0
        };
        let cutoff = self.rounder.round_basal(cutoff).min(self.max_safe);
        let iob = rec.bolus_iob.unwrap_or(0.0) + rec.basal_iob.unwrap_or(0.0);
        let activity = rec.iob_activity.unwrap_or(0.0);
        if k.variable && k.enabled && iob < -basal && activity < 0.0 {
            (Some(cutoff), Some(ReasonEvent::KetoVariable { cutoff }))
        } else if k.variable && (iob < 0.0 || activity < 0.0) {
            (
                None,
                Some(ReasonEvent::KetoVariableInactive {
                    iob,
                    basal,
                    activity,
                }),
            )
        } else if k.enabled && !k.variable {
            (Some(cutoff), Some(ReasonEvent::KetoContinuous { cutoff }))
        } else {
            (None, None)
        }
    }

    /// Apply a temp of `rate` U/hr for `duration` minutes to `rec`.
    pub fn apply(&self, rec: &mut TempBasalRequest, current: CurrentTemp, rate: f64, duration: f64) {
        let mut rate = rate.max(0.0);
        if rate > self.max_safe {
            rec.reason.sentence(ReasonEvent::RateLimitedByMaxSafe {
                rate: self.rounder.round_basal(rate),
                max_safe: self.rounder.round_basal(self.max_safe),
            });
            rate = self.max_safe;
        }
        // Rounding up to a pump step must not cross the ceiling.
        let mut suggested = self.rounder.round_basal(rate).min(self.max_safe);

        let (floor, keto_note) = self.keto_floor(rec);
        if let Some(floor) = floor
            && suggested < floor
        {
            tracing::debug!(suggested, floor, "ketosis protection raises temp");
            suggested = floor;
        }

        if current.duration > duration - 10.0
            && current.duration <= 120.0
            && suggested <= current.rate * 1.2
            && suggested >= current.rate * 0.8
            && duration > 0.0
        {
            if let Some(note) = keto_note {
                rec.reason.prepend(note);
            }
            rec.push(ReasonEvent::NoChangeNecessary {
                minutes: current.duration,
                rate: current.rate,
                suggested,
            });
            tracing::debug!(current = current.rate, suggested, "running temp already close enough");
            return;
        }

        if suggested == self.profile.current_basal {
            if self.skip_neutral_temps {
                if current.duration > 0.0 {
                    rec.reason.sentence(ReasonEvent::NeutralCancel);
                    rec.set_temp(0.0, 0.0);
                } else {
                    rec.reason.sentence(ReasonEvent::NeutralNoTemp);
                }
            } else {
                rec.reason.sentence(ReasonEvent::NeutralSetting { basal: suggested });
                rec.set_temp(suggested, duration);
            }
            return;
        }

        if let Some(note) = keto_note {
            rec.reason.prepend(note);
        }
        tracing::debug!(rate = suggested, duration, "temp basal set");
        rec.set_temp(suggested, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Units;
    use crate::rounding::PumpRounding;
    use chrono::DateTime;

    fn rec() -> TempBasalRequest {
        let at = DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap();
        TempBasalRequest::new(at, 120.0, 0.0, Units::MgDl)
    }

    fn profile() -> Profile {
        Profile {
            max_basal: 3.5,
            max_daily_basal: 1.0,
            ..Profile::default()
        }
    }

    #[test]
    fn max_safe_is_the_smallest_ceiling() {
        assert_eq!(max_safe_basal(&profile()), 3.0);
    }

    #[test]
    fn clamps_to_max_safe_and_explains() {
        let p = profile();
        let keto = KetoSettings::default();
        let r = PumpRounding::default();
        let setter = TempBasalSetter::new(&p, &keto, false, &r);
        let mut out = rec();
        setter.apply(&mut out, CurrentTemp::default(), 5.0, 30.0);
        assert_eq!(out.rate, Some(3.0));
        assert_eq!(out.duration, Some(30.0));
        assert!(out.reason.render().contains("limited by maxSafeBasal 3U/hr"));
    }

    #[test]
    fn rounding_never_lifts_rate_past_max_safe() {
        let p = Profile {
            max_basal: 3.03,
            max_daily_basal: 2.0,
            ..Profile::default()
        };
        let keto = KetoSettings::default();
        let r = PumpRounding::default();
        let setter = TempBasalSetter::new(&p, &keto, false, &r);
        assert_eq!(setter.max_safe(), 3.03);
        let mut out = rec();
        setter.apply(&mut out, CurrentTemp::default(), 5.0, 30.0);
        assert_eq!(out.rate, Some(3.03));
        let mut near = rec();
        setter.apply(&mut near, CurrentTemp::default(), 3.02, 30.0);
        assert!(near.rate.is_some_and(|r| r <= setter.max_safe()));
    }

    #[test]
    fn close_running_temp_is_left_alone() {
        let p = profile();
        let keto = KetoSettings::default();
        let r = PumpRounding::default();
        let setter = TempBasalSetter::new(&p, &keto, false, &r);
        let mut out = rec();
        let current = CurrentTemp {
            rate: 2.0,
            duration: 25.0,
        };
        setter.apply(&mut out, current, 2.1, 30.0);
        assert_eq!(out.rate, None);
        assert!(out.reason.render().contains("no change necessary"));
    }

    #[test]
    fn neutral_temp_is_skipped_when_configured() {
        let p = profile();
        let keto = KetoSettings::default();
        let r = PumpRounding::default();
        let setter = TempBasalSetter::new(&p, &keto, true, &r);
        let mut out = rec();
        let current = CurrentTemp {
            rate: 0.0,
            duration: 20.0,
        };
        setter.apply(&mut out, current, 1.0, 30.0);
        assert_eq!((out.rate, out.duration), (Some(0.0), Some(0.0)));
        let mut idle = rec();
        setter.apply(&mut idle, CurrentTemp::default(), 1.0, 30.0);
        assert_eq!(idle.rate, None);
    }

    #[test]
    fn continuous_keto_protection_floors_zero_temps() {
        let p = profile();
        let keto = KetoSettings {
            enabled: true,
            ..KetoSettings::default()
        };
        let r = PumpRounding::default();
        let setter = TempBasalSetter::new(&p, &keto, false, &r);
        let mut out = rec();
        setter.apply(&mut out, CurrentTemp::default(), 0.0, 60.0);
        assert_eq!(out.rate, Some(0.2));
        assert!(out.reason.render().starts_with("KetoProt:, 0.2U/hr"));
    }
}
