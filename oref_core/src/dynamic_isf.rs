//! TDD-driven dynamic sensitivity.
//!
//! The ratio scales ISF by how much insulin the user has needed lately and
//! by how far glucose is from target, either through a logarithmic curve or
//! a sigmoid bounded by the autosens limits.

use crate::config::{InsulinCurve, Settings};
use crate::tdd::TddBreakdown;
use crate::types::TddAverages;
use crate::util::{MMOL_PER_MGDL, round_to};

/// Parameters of the per-tick logarithmic ISF used by the predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogIsf {
    pub tdd: f64,
    pub adjustment_factor: f64,
    pub insulin_factor: f64,
}

impl LogIsf {
    /// Sensitivity at glucose `bg` (floored at 39 mg/dL).
    #[inline]
    pub fn isf_at(&self, bg: f64) -> f64 {
        1800.0 / (self.tdd * self.adjustment_factor * (bg.max(39.0) / self.insulin_factor + 1.0).ln())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicIsf {
    /// Clamped sensitivity ratio; replaces the autosens ratio.
    pub ratio: f64,
    /// 24 h TDD against the 14 day average, clamped to the autosens limits.
    pub tdd_ratio: f64,
    pub sigmoid: bool,
    pub dynamic_cr: bool,
    pub adjustment_factor: f64,
    /// Present for the logarithmic formula only.
    pub log_isf: Option<LogIsf>,
}

/// Peak-derived divisor of the logarithmic formula.
fn insulin_factor(settings: &Settings) -> f64 {
    let d = &settings.dynamic_isf;
    let peak = if d.use_custom_peak_time {
        d.insulin_peak_time
    } else {
        match d.curve {
            InsulinCurve::RapidActing | InsulinCurve::Bilinear => 65.0,
            InsulinCurve::UltraRapid => 50.0,
        }
    };
    let factor = 120.0 - peak;
    if factor > 0.0 { factor } else { 55.0 }
}

fn tdd_ratio(averages: Option<TddAverages>, min: f64, max: f64) -> f64 {
    let Some(avg) = averages.filter(|a| a.average_total > 0.0) else {
        return 1.0;
    };
    let ratio = avg.weighted_average / avg.average_total;
    if ratio > 1.0 {
        round_to(ratio.min(max), 2)
    } else if ratio < 1.0 {
        round_to(ratio.max(min), 2)
    } else {
        ratio
    }
}

/// Evaluate dynamic ISF for this cycle.
///
/// `Err` carries the reason the strategy stood down; the engine then falls
/// back to the plain autosens ratio.
pub fn evaluate(
    settings: &Settings,
    bg: f64,
    profile_target: f64,
    sensitivity: f64,
    tdd: &TddBreakdown,
    averages: Option<TddAverages>,
) -> Result<DynamicIsf, &'static str> {
    let d = &settings.dynamic_isf;
    let p = &settings.profile;
    let (mut lo, mut hi) = (p.autosens_min, p.autosens_max);
    if lo > hi {
        core::mem::swap(&mut lo, &mut hi);
    }
    if lo == hi || hi < 1.0 || lo > 1.0 {
        return Err("autosens limits");
    }
    if tdd.total <= 0.0 || !tdd.enough_history() {
        return Err("not enough pump history");
    }
    if profile_target >= 118.0 && settings.targets.exercise_setting() {
        return Err("high temp target");
    }

    let tdd_ratio = tdd_ratio(averages, lo, hi);
    let mut daily = tdd.total;
    if let Some(avg) = averages
        && d.weight_percentage < 1.0
        && avg.weighted_average > 0.0
    {
        daily = avg.weighted_average;
    }
    if daily <= 0.0 {
        return Err("no insulin delivered");
    }

    let af = d.adjustment_factor;
    let (raw, log_isf) = if d.sigmoid {
        let interval = hi - lo;
        let bg_dev = (bg - profile_target) * MMOL_PER_MGDL;
        let max_minus_one = if hi == 1.0 { 0.01 } else { hi - 1.0 };
        let fix_offset = (1.0 / max_minus_one - lo / max_minus_one).ln();
        let exponent = bg_dev * af * tdd_ratio + fix_offset;
        (interval / (1.0 + (-exponent).exp()) + lo, None)
    } else {
        let factor = insulin_factor(settings);
        let raw = sensitivity * af * daily * (bg / factor + 1.0).ln() / 1800.0;
        (
            raw,
            Some(LogIsf {
                tdd: daily,
                adjustment_factor: af,
                insulin_factor: factor,
            }),
        )
    };
    let ratio = round_to(raw.clamp(lo, hi), 2);
    tracing::debug!(raw, ratio, tdd = daily, tdd_ratio, sigmoid = d.sigmoid, "dynamic isf");
    Ok(DynamicIsf {
        ratio,
        tdd_ratio,
        sigmoid: d.sigmoid,
        dynamic_cr: d.enable_dynamic_cr,
        adjustment_factor: af,
        log_isf,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enough() -> TddBreakdown {
        TddBreakdown {
            total: 40.0,
            bolus: 20.0,
            temp_basal: 10.0,
            scheduled_basal: 10.0,
            pump_hours: 23.0,
        }
    }

    fn dynamic_settings() -> Settings {
        let mut s = Settings::default();
        s.dynamic_isf.enabled = true;
        s
    }

    #[test]
    fn stands_down_when_limits_collapse() {
        let mut s = dynamic_settings();
        s.profile.autosens_min = 1.0;
        s.profile.autosens_max = 1.0;
        assert_eq!(evaluate(&s, 150.0, 100.0, 50.0, &enough(), None), Err("autosens limits"));
    }

    #[test]
    fn stands_down_without_a_day_of_history() {
        let s = dynamic_settings();
        let short = TddBreakdown {
            pump_hours: 12.0,
            ..enough()
        };
        assert!(evaluate(&s, 150.0, 100.0, 50.0, &short, None).is_err());
    }

    #[test]
    fn ratio_stays_within_autosens_limits() {
        let s = dynamic_settings();
        for bg in [40.0, 100.0, 250.0, 400.0] {
            let got = evaluate(&s, bg, 100.0, 50.0, &enough(), None).unwrap();
            assert!((0.7..=1.2).contains(&got.ratio), "bg {bg}: {}", got.ratio);
        }
    }

    #[test]
    fn sigmoid_is_neutral_at_target() {
        let mut s = dynamic_settings();
        s.dynamic_isf.sigmoid = true;
        let got = evaluate(&s, 100.0, 100.0, 50.0, &enough(), None).unwrap();
        assert!((got.ratio - 1.0).abs() < 0.011);
        assert!(got.log_isf.is_none());
    }

    #[test]
    fn log_isf_falls_as_glucose_rises() {
        let isf = LogIsf {
            tdd: 40.0,
            adjustment_factor: 0.8,
            insulin_factor: 55.0,
        };
        assert!(isf.isf_at(200.0) < isf.isf_at(100.0));
        assert_eq!(isf.isf_at(10.0), isf.isf_at(39.0));
    }
}
