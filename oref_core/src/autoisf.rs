//! autoISF: ISF scaled by the glucose level, its rate and acceleration,
//! post-meal rise and time spent on a high plateau.
//!
//! Each contribution is a ratio around 1.0. The strongest one wins, is
//! capped by the configured limits and combined with the cycle's
//! sensitivity ratio before it divides the profile ISF.

use oref_traits::Timestamp;
use serde::Serialize;

use crate::config::AutoIsfSettings;
use crate::reason::{FitNote, IsfLimit, ReasonEvent};
use crate::status::SmbStatus;
use crate::types::{GlucoseStatus, MealData};
use crate::util::{minutes_between, round_to};

const BG_X: [f64; 9] = [50.0, 60.0, 80.0, 90.0, 100.0, 110.0, 150.0, 180.0, 200.0];
const BG_Y: [f64; 9] = [-0.5, -0.5, -0.3, -0.2, 0.0, 0.0, 0.5, 0.7, 0.7];
const DELTA_X: [f64; 5] = [2.0, 7.0, 12.0, 16.0, 20.0];
const DELTA_Y: [f64; 5] = [0.0, 0.0, 0.4, 0.7, 0.7];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// Input is `100 - (target + 10 - bg)`; output scaled by the range weights.
    Glucose,
    /// Input is the 5-minute delta; output scaled by the delta weight.
    Delta,
}

fn lerp(x: f64, (x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> f64 {
    y0 + (y1 - y0) / (x1 - x0) * (x - x0)
}

/// Piecewise-linear table lookup, extrapolating past either end from the
/// outermost pair, then weighted.
pub fn interpolate(x: f64, curve: Curve, s: &AutoIsfSettings) -> f64 {
    let (xs, ys): (&[f64], &[f64]) = match curve {
        Curve::Glucose => (&BG_X, &BG_Y),
        Curve::Delta => (&DELTA_X, &DELTA_Y),
    };
    let last = xs.len() - 1;
    let raw = if x < xs[0] {
        lerp(x, (xs[0], ys[0]), (xs[1], ys[1]))
    } else if x >= xs[last] {
        lerp(x, (xs[last - 1], ys[last - 1]), (xs[last], ys[last]))
    } else {
        let i = xs.iter().rposition(|&v| v <= x).unwrap_or(0);
        lerp(x, (xs[i], ys[i]), (xs[i + 1], ys[i + 1]))
    };
    match curve {
        Curve::Delta => raw * s.delta_range_weight,
        Curve::Glucose if x > 100.0 => raw * s.higher_range_weight,
        Curve::Glucose => raw * s.lower_range_weight,
    }
}

/// Apply the configured limits to `lift` and combine it with the cycle's
/// sensitivity ratio.
pub fn within_limits(lift: f64, s: &AutoIsfSettings, sensitivity_ratio: f64, exercise: bool) -> (f64, Option<IsfLimit>) {
    let (lift, limit) = if lift < s.min {
        (s.min, Some(IsfLimit::Min))
    } else if lift > s.max {
        (s.max, Some(IsfLimit::Max))
    } else {
        (lift, None)
    };
    let combined = if exercise {
        lift * sensitivity_ratio
    } else if lift >= 1.0 {
        lift.max(sensitivity_ratio)
    } else {
        lift.min(sensitivity_ratio)
    };
    (combined, limit)
}

/// Ratios behind the cycle's ISF, echoed in the decision record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IsfRatios {
    pub bg: f64,
    pub delta: f64,
    pub pp: f64,
    pub dura: f64,
    pub acce: f64,
    #[serde(rename = "auto")]
    pub final_ratio: f64,
}

impl Default for IsfRatios {
    fn default() -> Self {
        Self {
            bg: 1.0,
            delta: 1.0,
            pp: 1.0,
            dura: 1.0,
            acce: 1.0,
            final_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AutoIsfInputs<'a> {
    pub glucose: &'a GlucoseStatus,
    pub meal: &'a MealData,
    pub now: Timestamp,
    /// Override-adjusted profile ISF.
    pub profile_sens: f64,
    /// ISF after the sensitivity ratio.
    pub sens: f64,
    pub sensitivity_ratio: f64,
    pub target_bg: f64,
    pub status: SmbStatus,
    /// Exercise temp target active (high target raising sensitivity).
    pub exercise: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoIsfOutcome {
    pub sens: f64,
    pub ratios: IsfRatios,
    pub notes: Vec<ReasonEvent>,
}

/// Parabola-fit contribution; also reports the turning point.
fn acceleration_ratio(g: &GlucoseStatus, target_bg: f64, s: &AutoIsfSettings) -> (f64, Option<FitNote>) {
    let fit = g.fit;
    let acce = fit.acceleration;
    let mut weight = 1.0;
    let mut note = None;
    if fit.a2 != 0.0 && fit.correlation >= 0.9 {
        let minutes = -fit.a1 / 2.0 / fit.a2 * 5.0;
        let value = round_to(fit.a0 - minutes * minutes / 25.0 * fit.a2, 1);
        let minutes = round_to(minutes, 1);
        note = Some(if minutes > 0.0 && acce < 0.0 {
            FitNote::PredictsMax { value, minutes }
        } else if minutes > 0.0 && acce > 0.0 {
            if minutes <= 30.0 && value < target_bg {
                weight = -s.brake_weight;
                FitNote::BrakeBelowTarget { weight: s.brake_weight }
            } else {
                FitNote::PredictsMin { value, minutes }
            }
        } else if acce < 0.0 {
            FitNote::SawMax { value, minutes }
        } else {
            FitNote::SawMin { value, minutes }
        });
    }
    if fit.correlation < 0.9 {
        return (
            1.0,
            Some(FitNote::LowCorrelation {
                correlation: fit.correlation,
            }),
        );
    }
    let fit_share = 10.0 * (fit.correlation - 0.9);
    let mut cap = 1.0;
    if weight == 1.0 && g.glucose < target_bg {
        if acce > 0.0 {
            if acce > 1.0 {
                cap = 0.5;
            }
            weight = s.brake_weight;
        } else if acce < 0.0 {
            weight = s.accel_weight;
        }
    } else if weight == 1.0 {
        if acce < 0.0 {
            weight = s.brake_weight;
        } else if acce > 0.0 {
            weight = s.accel_weight;
        }
    }
    let ratio = 1.0 + acce * cap * weight * fit_share;
    tracing::debug!(acce, weight, cap, fit_share, ratio, "acce-isf");
    (if ratio < 0.0 { 0.1 } else { ratio }, note)
}

#[allow(clippy::too_many_lines)]
pub fn auto_isf(input: AutoIsfInputs<'_>, s: &AutoIsfSettings) -> AutoIsfOutcome {
    let mut ratios = IsfRatios::default();
    let mut notes = vec![ReasonEvent::SmbGate(input.status)];
    if !s.enabled {
        notes.push(ReasonEvent::AutoIsfDisabled);
        return AutoIsfOutcome {
            sens: input.sens,
            ratios,
            notes,
        };
    }
    if s.off_sport && input.exercise {
        notes.push(ReasonEvent::AutoIsfDisabledExercise);
        return AutoIsfOutcome {
            sens: input.sens,
            ratios,
            notes,
        };
    }

    let g = input.glucose;
    let bg = g.glucose;
    let target = input.target_bg;

    if s.accel_enabled {
        let (acce, note) = acceleration_ratio(g, target, s);
        ratios.acce = acce;
        let acce_ratio = (!matches!(note, Some(FitNote::LowCorrelation { .. }))).then_some(acce);
        notes.push(ReasonEvent::ParabolicFit { note, acce_ratio });
    }
    notes.push(ReasonEvent::AutoIsfMarker);

    let bg_off = target + 10.0 - bg;
    let bg_isf = 1.0 + interpolate(100.0 - bg_off, Curve::Glucose, s);
    ratios.bg = bg_isf;
    tracing::debug!(bg_off, bg_isf, "bg-isf");

    let finish = |lift: f64, ratios: &mut IsfRatios, notes: &mut Vec<ReasonEvent>, cap_high: bool| {
        let (final_ratio, limit) = within_limits(lift, s, input.sensitivity_ratio, input.exercise);
        let mut sens = round_to(input.profile_sens / final_ratio, 1);
        if cap_high {
            sens = sens.min(720.0);
        }
        ratios.final_ratio = final_ratio;
        notes.push(ReasonEvent::FinalIsf {
            ratio: final_ratio,
            exercise: input.exercise,
            limit,
            from: input.profile_sens,
            to: sens,
        });
        tracing::info!(lift, final_ratio, sens, "autoISF adjusted sensitivity");
        sens
    };

    if bg_isf < 1.0 {
        let (lift, accelerating) = if ratios.acce > 1.0 {
            (bg_isf * ratios.acce, true)
        } else {
            (bg_isf.min(ratios.acce), false)
        };
        notes.push(ReasonEvent::BgIsfRatio {
            ratio: lift,
            accelerating: Some(accelerating),
        });
        let sens = finish(lift, &mut ratios, &mut notes, true);
        return AutoIsfOutcome { sens, ratios, notes };
    }
    let mut modified = bg_isf > 1.0 || ratios.acce != 1.0;
    notes.push(ReasonEvent::BgIsfRatio {
        ratio: bg_isf,
        accelerating: None,
    });

    let hours_since_carbs = input
        .meal
        .last_carb_time
        .map(|t| minutes_between(input.now, t) / 60.0);
    let post_prandial = s.pp_always || hours_since_carbs.is_some_and(|h| s.pp_hours >= h);
    if bg_off > 0.0 {
        tracing::debug!(bg_off, "delta-isf bypassed below target");
    } else if g.short_avg_delta < 0.0 {
        tracing::debug!(short_avg_delta = g.short_avg_delta, "delta-isf bypassed while falling");
    } else if post_prandial {
        ratios.pp = 1.0 + (g.delta * s.pp_weight).max(0.0);
        notes.push(ReasonEvent::PpIsfRatio(ratios.pp));
        modified |= ratios.pp != 1.0;
    } else {
        let mut delta_isf = interpolate(g.delta, Curve::Delta, s);
        if bg_off > -20.0 {
            delta_isf *= 0.5;
        }
        ratios.delta = 1.0 + delta_isf;
        notes.push(ReasonEvent::DeltaIsfRatio(ratios.delta));
        modified |= ratios.delta != 1.0;
    }

    let dura = g.dura_isf_minutes;
    let avg = g.dura_isf_average;
    if input.meal.meal_cob > 0.0 && !s.with_cob {
        tracing::debug!(cob = input.meal.meal_cob, "dura-isf bypassed with carbs on board");
    } else if dura < 10.0 || avg <= target {
        tracing::debug!(dura, avg, "dura-isf bypassed");
    } else {
        ratios.dura = 1.0 + dura / 60.0 * (s.dura_weight / target) * (avg - target);
        notes.push(ReasonEvent::DuraIsfRatio {
            minutes: dura,
            average: avg,
            ratio: ratios.dura,
        });
        modified |= ratios.dura != 1.0;
    }

    if !modified {
        notes.push(ReasonEvent::AutoIsfNotModified);
        return AutoIsfOutcome {
            sens: input.sens,
            ratios,
            notes,
        };
    }
    let mut lift = ratios.dura.max(ratios.bg).max(ratios.delta).max(ratios.acce).max(ratios.pp);
    if ratios.acce < 1.0 {
        lift *= ratios.acce;
    }
    let sens = finish(lift, &mut ratios, &mut notes, false);
    AutoIsfOutcome { sens, ratios, notes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParabolaFit;
    use chrono::DateTime;

    fn settings() -> AutoIsfSettings {
        AutoIsfSettings {
            enabled: true,
            min: 0.5,
            max: 2.0,
            lower_range_weight: 1.0,
            higher_range_weight: 1.0,
            delta_range_weight: 1.0,
            ..AutoIsfSettings::default()
        }
    }

    fn accel_settings() -> AutoIsfSettings {
        AutoIsfSettings {
            accel_enabled: true,
            accel_weight: 0.5,
            brake_weight: 0.5,
            ..settings()
        }
    }

    fn fitted(glucose: f64, a0: f64, a1: f64, a2: f64, acceleration: f64) -> GlucoseStatus {
        let mut g = GlucoseStatus::flat(now(), glucose);
        g.fit = ParabolaFit {
            correlation: 0.99,
            acceleration,
            a0,
            a1,
            a2,
            ..ParabolaFit::default()
        };
        g
    }

    fn now() -> Timestamp {
        DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap()
    }

    fn inputs<'a>(g: &'a GlucoseStatus, meal: &'a MealData) -> AutoIsfInputs<'a> {
        AutoIsfInputs {
            glucose: g,
            meal,
            now: now(),
            profile_sens: 50.0,
            sens: 50.0,
            sensitivity_ratio: 1.0,
            target_bg: 100.0,
            status: SmbStatus::Oref,
            exercise: false,
        }
    }

    #[test]
    fn interpolates_and_extrapolates_flat_ends() {
        let s = settings();
        assert_eq!(interpolate(100.0, Curve::Glucose, &s), 0.0);
        assert!((interpolate(165.0, Curve::Glucose, &s) - 0.6).abs() < 1e-9);
        assert!((interpolate(250.0, Curve::Glucose, &s) - 0.7).abs() < 1e-9);
        assert!((interpolate(20.0, Curve::Glucose, &s) + 0.5).abs() < 1e-9);
        assert!((interpolate(14.0, Curve::Delta, &s) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn limits_clamp_and_report() {
        let s = settings();
        assert_eq!(within_limits(3.0, &s, 1.0, false), (2.0, Some(IsfLimit::Max)));
        assert_eq!(within_limits(0.2, &s, 1.0, false), (0.5, Some(IsfLimit::Min)));
        assert_eq!(within_limits(1.3, &s, 1.5, false), (1.5, None));
        assert_eq!(within_limits(1.3, &s, 0.5, true), (0.65, None));
    }

    #[test]
    fn high_glucose_strengthens_isf() {
        let s = settings();
        let g = GlucoseStatus::flat(now(), 180.0);
        let meal = MealData::default();
        let got = auto_isf(inputs(&g, &meal), &s);
        // bg_off = -70 -> table at 170 -> 1.633
        assert!(got.sens < 50.0);
        assert!(got.ratios.bg > 1.6);
        assert!(got.notes.iter().any(|e| matches!(e, ReasonEvent::FinalIsf { .. })));
    }

    #[test]
    fn in_range_glucose_is_not_modified() {
        let s = settings();
        let g = GlucoseStatus::flat(now(), 112.0);
        let meal = MealData::default();
        let got = auto_isf(inputs(&g, &meal), &s);
        assert_eq!(got.sens, 50.0);
        assert_eq!(got.notes.last(), Some(&ReasonEvent::AutoIsfNotModified));
    }

    #[test]
    fn low_glucose_weakens_isf() {
        let s = settings();
        let g = GlucoseStatus::flat(now(), 70.0);
        let meal = MealData::default();
        let got = auto_isf(inputs(&g, &meal), &s);
        assert!(got.sens > 50.0);
    }

    #[test]
    fn exercise_target_switches_off() {
        let s = settings();
        let g = GlucoseStatus::flat(now(), 180.0);
        let meal = MealData::default();
        let got = auto_isf(
            AutoIsfInputs {
                exercise: true,
                ..inputs(&g, &meal)
            },
            &s,
        );
        assert_eq!(got.sens, 50.0);
        assert!(got.notes.contains(&ReasonEvent::AutoIsfDisabledExercise));
    }

    #[test]
    fn acceleration_alone_strengthens_in_range_isf() {
        let s = accel_settings();
        // turning point 5 min ago, fit share 0.9 -> ratio 1 + 2 * 0.5 * 0.9
        let g = fitted(110.0, 110.0, 2.0, 1.0, 2.0);
        let meal = MealData::default();
        let got = auto_isf(inputs(&g, &meal), &s);
        assert!((got.ratios.acce - 1.9).abs() < 1e-9);
        assert_eq!(got.sens, 26.3);
        assert!(!got.notes.contains(&ReasonEvent::AutoIsfNotModified));
        assert!(got.notes.iter().any(|e| matches!(e, ReasonEvent::FinalIsf { .. })));
    }

    #[test]
    fn distant_low_minimum_does_not_brake() {
        // minimum of 70 forecast 100 min out
        let g = fitted(150.0, 110.0, -4.0, 0.1, 0.2);
        let (ratio, note) = acceleration_ratio(&g, 100.0, &accel_settings());
        assert_eq!(note, Some(FitNote::PredictsMin { value: 70.0, minutes: 100.0 }));
        assert!(ratio > 1.0);
    }

    #[test]
    fn near_low_minimum_brakes() {
        // minimum of 97.5 forecast 25 min out
        let g = fitted(150.0, 100.0, -1.0, 0.1, 0.2);
        let (ratio, note) = acceleration_ratio(&g, 100.0, &accel_settings());
        assert_eq!(note, Some(FitNote::BrakeBelowTarget { weight: 0.5 }));
        assert!((ratio - 0.91).abs() < 1e-9);
    }
}
