//! Effective targets, sensitivity ratio, basal, ISF and carb ratio for one
//! cycle.
//!
//! Exactly one strategy shapes the sensitivity ratio; see
//! [`SensitivityStrategy::select`].

use oref_traits::BasalRounder;

use crate::config::Settings;
use crate::dynamic_isf::DynamicIsf;
use crate::reason::ReasonEvent;
use crate::util::{round_to, round0};

/// Which mechanism adjusts sensitivity this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityStrategy {
    /// Externally supplied autosens ratio (or none).
    Autosens,
    /// TDD-driven ratio; falls back to autosens when it stands down.
    Dynamic,
    /// Glucose-shape driven ISF scaling.
    AutoIsf,
}

impl SensitivityStrategy {
    pub fn select(settings: &Settings) -> Self {
        if settings.autoisf.enabled {
            Self::AutoIsf
        } else if settings.dynamic_isf.enabled {
            Self::Dynamic
        } else {
            Self::Autosens
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Targets {
    pub min_bg: f64,
    pub max_bg: f64,
    pub target_bg: f64,
}

/// Targets before any sensitivity or noise adjustment: profile midpoint, or
/// the override target when one is active and no temp target is set.
pub fn base_targets(settings: &Settings) -> Targets {
    let p = &settings.profile;
    let o = &settings.overrides;
    if o.enabled && o.target != 0.0 && !p.temptarget_set {
        return Targets {
            min_bg: o.target,
            max_bg: o.target,
            target_bg: o.target,
        };
    }
    Targets {
        min_bg: p.min_bg,
        max_bg: p.max_bg,
        target_bg: p.profile_target(),
    }
}

/// Profile ISF with the override applied.
pub fn override_sens(settings: &Settings) -> f64 {
    let o = &settings.overrides;
    if o.isf_and_cr || o.isf {
        settings.profile.sens / o.factor()
    } else {
        settings.profile.sens
    }
}

/// Carb ratio with the override applied.
pub fn override_carb_ratio(settings: &Settings, carb_ratio: f64) -> f64 {
    let o = &settings.overrides;
    if o.isf_and_cr || o.cr {
        carb_ratio / o.factor()
    } else {
        carb_ratio
    }
}

/// Sensitivity ratio implied by a temp target, capped at `autosens_max`.
///
/// With a half-basal target of 160 a temp target of 120 gives 0.75.
pub fn temp_target_ratio(target_bg: f64, half_basal_target: f64, autosens_max: f64) -> f64 {
    let c = half_basal_target - 100.0;
    let ratio = if c * (c + target_bg - 100.0) <= 0.0 {
        autosens_max
    } else {
        c / (c + target_bg - 100.0)
    };
    round_to(ratio.min(autosens_max), 2)
}

/// Shift targets toward 60 mg/dL by the sensitivity ratio.
fn adjust_for_ratio(t: Targets, ratio: f64) -> Targets {
    Targets {
        min_bg: round0((t.min_bg - 60.0) / ratio) + 60.0,
        max_bg: round0((t.max_bg - 60.0) / ratio) + 60.0,
        target_bg: (round0((t.target_bg - 60.0) / ratio) + 60.0).max(80.0),
    }
}

/// Widen targets on a noisy CGM, capped at 200 mg/dL.
fn widen_for_noise(t: Targets, multiplier: f64) -> Targets {
    let m = multiplier.max(1.1);
    Targets {
        min_bg: round0((t.min_bg * m).min(200.0)),
        max_bg: round0((t.max_bg * m).min(200.0)),
        target_bg: round0((t.target_bg * m).min(200.0)),
    }
}

/// Low-glucose suspend threshold derived from `min_bg`.
///
/// - A configured ratio outside (0.5, 1] falls back to 0.5.
/// - A fixed setting replaces the result when it is higher and lies within
///   [65, 120] mg/dL.
pub fn threshold(min_bg: f64, ratio_setting: f64, fixed: Option<f64>) -> f64 {
    let ratio = if ratio_setting > 0.5 && ratio_setting <= 1.0 {
        ratio_setting
    } else {
        0.5
    };
    let derived = min_bg - (1.0 - ratio) * (min_bg - 40.0);
    match fixed {
        Some(v) if v > derived && (65.0..=120.0).contains(&v) => v,
        _ => derived,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensitivity {
    pub targets: Targets,
    pub threshold: f64,
    /// Sensitivity ratio applied to ISF and basal.
    pub ratio: f64,
    /// Ratio from an exercise temp target, 1.0 otherwise.
    pub exercise_ratio: f64,
    pub basal: f64,
    /// Override-adjusted profile ISF.
    pub profile_sens: f64,
    pub sens: f64,
    pub carb_ratio: f64,
    /// Basal scaled by the TDD ratio; reported in the header.
    pub basal_ratio: Option<f64>,
    pub notes: Vec<ReasonEvent>,
}

/// Per-cycle values the preparation reads besides settings.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub bg: f64,
    pub noise: f64,
    pub autosens_ratio: f64,
    /// Carb ratio in force now, before override.
    pub carb_ratio: f64,
    pub dynamic: Option<&'a DynamicIsf>,
}

pub fn prepare(settings: &Settings, observed: Observed<'_>, rounder: &impl BasalRounder) -> Sensitivity {
    let p = &settings.profile;
    let policy = &settings.targets;
    let factor = settings.overrides.factor();
    let base = base_targets(settings);
    let mut notes = Vec::new();

    let autosens_ratio = match observed.dynamic {
        Some(d) => d.ratio,
        None => observed.autosens_ratio.clamp(p.autosens_min, p.autosens_max),
    };

    let tt = p.temptarget_set;
    let high_tt = policy.exercise_setting() && tt && base.target_bg > 100.0;
    let low_tt = policy.low_temptarget_lowers_sensitivity && tt && base.target_bg < 100.0;
    let mut exercise_ratio = 1.0;
    let mut ratio = if high_tt || low_tt {
        let r = temp_target_ratio(base.target_bg, policy.half_basal_exercise_target, p.autosens_max);
        exercise_ratio = r;
        notes.push(ReasonEvent::TempTargetRatio(r));
        tracing::debug!(ratio = r, target = base.target_bg, "temp target sensitivity ratio");
        r
    } else if policy.enable_autosens || observed.dynamic.is_some() {
        notes.push(ReasonEvent::Autosens(autosens_ratio));
        autosens_ratio
    } else {
        1.0
    };

    if let Some(d) = observed.dynamic
        && tt
        && base.target_bg < 100.0
        && observed.bg >= base.target_bg
        && ratio < d.ratio
    {
        ratio = round_to((d.ratio * 100.0 / base.target_bg).min(p.autosens_max), 2);
        tracing::debug!(ratio, "low temp target amplifies dynamic ratio");
    }

    let mut basal_ratio = None;
    let basal = match observed.dynamic {
        Some(d) if settings.dynamic_isf.tdd_adjust_basal => {
            basal_ratio = Some(d.tdd_ratio);
            rounder.round_basal(p.current_basal * d.tdd_ratio * factor)
        }
        Some(_) => rounder.round_basal(p.current_basal) * factor,
        None => rounder.round_basal(p.current_basal * factor * ratio),
    };

    let mut targets = base;
    if !tt
        && ((policy.sensitivity_raises_target && autosens_ratio < 1.0)
            || (policy.resistance_lowers_target && autosens_ratio > 1.0))
    {
        targets = adjust_for_ratio(targets, autosens_ratio);
        tracing::debug!(?targets, autosens_ratio, "targets adjusted for sensitivity");
    }
    if observed.noise >= 2.0 {
        targets = widen_for_noise(targets, policy.noisy_cgm_target_multiplier);
        tracing::debug!(?targets, noise = observed.noise, "targets widened for noisy cgm");
    }

    let threshold = threshold(targets.min_bg, settings.smb.threshold_ratio, settings.smb.threshold_setting);
    let profile_sens = override_sens(settings);
    let sens = round_to(profile_sens / ratio, 1);
    let mut carb_ratio = override_carb_ratio(settings, observed.carb_ratio);
    if let Some(d) = observed.dynamic
        && d.dynamic_cr
    {
        carb_ratio = round_to(carb_ratio / d.ratio, 2);
    }

    Sensitivity {
        targets,
        threshold,
        ratio,
        exercise_ratio,
        basal,
        profile_sens,
        sens,
        carb_ratio,
        basal_ratio,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounding::PumpRounding;

    fn observed() -> Observed<'static> {
        Observed {
            bg: 120.0,
            noise: 0.0,
            autosens_ratio: 1.0,
            carb_ratio: 10.0,
            dynamic: None,
        }
    }

    #[test]
    fn temp_target_ratio_matches_half_basal_curve() {
        assert_eq!(temp_target_ratio(120.0, 160.0, 1.2), 0.75);
        assert_eq!(temp_target_ratio(80.0, 160.0, 1.2), 1.2);
        // a half-basal target at 100 collapses the curve
        assert_eq!(temp_target_ratio(140.0, 100.0, 1.2), 1.2);
    }

    #[test]
    fn threshold_defaults_to_half_way_to_40() {
        assert_eq!(threshold(100.0, 0.5, None), 70.0);
        assert_eq!(threshold(100.0, 0.2, None), 70.0);
        assert_eq!(threshold(100.0, 1.0, None), 100.0);
        assert_eq!(threshold(100.0, 0.5, Some(75.0)), 75.0);
        assert_eq!(threshold(100.0, 0.5, Some(130.0)), 70.0);
    }

    #[test]
    fn sensitive_autosens_raises_targets() {
        let s = Settings::default();
        let got = prepare(
            &s,
            Observed {
                autosens_ratio: 0.8,
                ..observed()
            },
            &PumpRounding::default(),
        );
        assert_eq!(got.targets.min_bg, 110.0);
        assert_eq!(got.sens, 62.5);
        assert_eq!(got.basal, 0.8);
        assert!(matches!(got.notes[..], [ReasonEvent::Autosens(r)] if r == 0.8));
    }

    #[test]
    fn exercise_temp_target_sets_exercise_ratio() {
        let mut s = Settings::default();
        s.targets.exercise_mode = true;
        s.profile.temptarget_set = true;
        s.profile.min_bg = 120.0;
        s.profile.max_bg = 120.0;
        let got = prepare(&s, observed(), &PumpRounding::default());
        assert_eq!(got.exercise_ratio, 0.75);
        assert_eq!(got.ratio, 0.75);
        assert_eq!(got.targets.target_bg, 120.0);
    }

    #[test]
    fn noisy_cgm_widens_targets() {
        let s = Settings::default();
        let got = prepare(
            &s,
            Observed {
                noise: 2.0,
                ..observed()
            },
            &PumpRounding::default(),
        );
        assert_eq!(got.targets.min_bg, 130.0);
        assert_eq!(got.targets.target_bg, 130.0);
    }

    #[test]
    fn override_scales_basal_and_sensitivity() {
        let mut s = Settings::default();
        s.overrides.enabled = true;
        s.overrides.percentage = 50.0;
        let got = prepare(&s, observed(), &PumpRounding::default());
        assert_eq!(got.basal, 0.5);
        assert_eq!(got.profile_sens, 100.0);
        assert_eq!(got.carb_ratio, 20.0);
    }
}
