//! Four-hour glucose forecasts.
//!
//! Each curve starts at the current glucose and advances in 5-minute
//! steps along the IOB model:
//!
//! - IOB: insulin effect plus a decaying current deviation
//! - ZT: insulin effect if a zero temp started now
//! - COB: IOB plus carb absorption (linear decay plus a bilinear tail)
//! - UAM: IOB plus a decaying unannounced-meal impact
//!
//! Curves are clamped to [39, 401] mg/dL and trimmed of flat tails; the
//! guard and blended minima drive the dosing branches.

use serde::Serialize;

use crate::dynamic_isf::LogIsf;
use crate::types::MealData;
use crate::util::{BG_FLOOR, clamp_bg, round_to, round0};

/// Maximum number of points kept per curve (4 h).
pub const MAX_POINTS: usize = 48;

/// One validated step of the IOB model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IobPoint {
    pub iob: f64,
    pub activity: f64,
    pub zero_temp_activity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PredictionInputs<'a> {
    pub ticks: &'a [IobPoint],
    pub meal: &'a MealData,
    pub bg: f64,
    pub sens: f64,
    pub carb_ratio: f64,
    pub min_delta: f64,
    pub bgi: f64,
    pub sensitivity_ratio: f64,
    pub target_bg: f64,
    pub threshold: f64,
    pub enable_uam: bool,
    pub floating_carbs: bool,
    pub remaining_carbs_cap: f64,
    pub remaining_carbs_fraction: f64,
    /// g/h ceiling on the carb impact used by the IOB and COB curves.
    pub max_carb_absorption_rate: f64,
    /// Minutes since the last carb entry; `None` when there is none.
    pub carb_age_minutes: Option<f64>,
    pub log_isf: Option<LogIsf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PredictedCurves {
    #[serde(rename = "IOB")]
    pub iob: Vec<f64>,
    #[serde(rename = "ZT")]
    pub zt: Vec<f64>,
    #[serde(rename = "COB", skip_serializing_if = "Option::is_none")]
    pub cob: Option<Vec<f64>>,
    #[serde(rename = "UAM", skip_serializing_if = "Option::is_none")]
    pub uam: Option<Vec<f64>>,
}

/// Carb absorption parameters for the COB curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbImpact {
    /// Current carb impact, mg/dL per 5 minutes.
    pub ci: f64,
    pub csf: f64,
    /// Ticks of linear carb-impact decay.
    pub cid: f64,
    /// Peak of the bilinear remaining-carbs tail.
    pub remaining_ci_peak: f64,
    pub absorption_hours: f64,
    /// Floating-carbs details: `(cid from carbs, cid from cob)`.
    pub floating: Option<(f64, f64)>,
}

impl CarbImpact {
    pub fn active(&self) -> bool {
        self.ci > 0.0 || self.remaining_ci_peak > 0.0
    }

    fn has_carb_curve(&self) -> bool {
        self.cid != 0.0 || self.remaining_ci_peak > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub curves: PredictedCurves,
    pub carbs: CarbImpact,
    pub eventual_bg: f64,
    pub min_pred_bg: f64,
    pub min_guard_bg: f64,
    pub avg_pred_bg: f64,
    /// Lowest IOB-curve value after the first 90 minutes, floored at 39.
    pub min_iob_pred_bg: Option<f64>,
    pub last_iob_pred_bg: f64,
    pub last_cob_pred_bg: Option<f64>,
    pub last_uam_pred_bg: Option<f64>,
    pub last_zt_pred_bg: f64,
    /// Minutes the unannounced-meal impact is forecast to last.
    pub uam_duration_hours: f64,
}

fn carb_impact(input: &PredictionInputs<'_>) -> CarbImpact {
    let meal = input.meal;
    let mut ci = round_to(input.min_delta - input.bgi, 1);
    let csf = input.sens / input.carb_ratio;
    let max_ci = round_to(input.max_carb_absorption_rate * csf * 5.0 / 60.0, 1);
    if ci > max_ci {
        tracing::debug!(
            ci,
            max_ci,
            rate = input.max_carb_absorption_rate,
            "limiting carb impact"
        );
        ci = max_ci;
    }
    let mut hours = 3.0 / input.sensitivity_ratio;
    if meal.carbs > 0.0 {
        hours = hours.max(meal.meal_cob / 20.0);
        let age = round0(input.carb_age_minutes.unwrap_or(0.0));
        hours = round_to(hours + 1.5 * age / 60.0, 1);
    }
    let total_ci = (ci / 5.0 * 60.0 * hours / 2.0).max(0.0);
    let total_ca = total_ci / csf;
    let cap = input.remaining_carbs_cap.min(90.0);
    let fraction = input.remaining_carbs_fraction.min(1.0);
    let remaining = (meal.meal_cob - total_ca - meal.carbs * (1.0 - fraction))
        .max(0.0)
        .min(cap);
    let remaining_ci_peak = remaining * csf * 5.0 / 60.0 / (hours / 2.0);

    let cid_for = |carbs: f64| {
        if ci == 0.0 {
            0.0
        } else {
            (hours * 60.0 / 5.0 / 2.0).min((carbs * csf / ci).max(0.0))
        }
    };
    let cob_cid = cid_for(meal.meal_cob);
    let (cid, floating) = if input.floating_carbs && meal.carbs > 0.0 {
        let nfcid = cid_for(meal.carbs);
        (nfcid, Some((nfcid, cob_cid)))
    } else {
        (cob_cid, None)
    };
    tracing::debug!(ci, csf, cid, remaining_ci_peak, hours, "carb impact");
    CarbImpact {
        ci,
        csf,
        cid,
        remaining_ci_peak,
        absorption_hours: hours,
        floating,
    }
}

/// Drop repeated trailing values beyond index `keep`.
fn trim_flat_tail(curve: &mut Vec<f64>, keep: usize) {
    while curve.len() > keep + 1 {
        let i = curve.len() - 1;
        if curve[i - 1] != curve[i] {
            break;
        }
        curve.pop();
    }
}

/// The zero-temp curve is trimmed while it is still rising above target.
fn trim_zero_temp(curve: &mut Vec<f64>, target_bg: f64) {
    while curve.len() > 7 {
        let i = curve.len() - 1;
        if curve[i - 1] >= curve[i] || curve[i] <= target_bg {
            break;
        }
        curve.pop();
    }
}

#[derive(Debug, Default)]
struct Minima {
    iob_guard: f64,
    cob_guard: f64,
    uam_guard: f64,
    zt_guard: f64,
    iob: Option<f64>,
    cob: Option<f64>,
    uam: Option<f64>,
    max_iob: f64,
    max_cob: Option<f64>,
}

#[allow(clippy::too_many_lines)]
pub fn predict(input: &PredictionInputs<'_>, naive_eventual_bg: f64, eventual_bg: f64) -> Predictions {
    let bg = input.bg;
    let carbs = carb_impact(input);
    // UAM impact is the observed rise, never capped by the carb ceiling.
    let uci = round_to(input.min_delta - input.bgi, 1);
    let slope = round_to(input.meal.slope_from_max_deviation, 2)
        .min(-round_to(input.meal.slope_from_min_deviation, 2) / 3.0);

    let mut iob_curve = vec![bg];
    let mut zt_curve = vec![bg];
    let mut cob_curve = vec![bg];
    let mut uam_curve = vec![bg];
    // Curve tails feed the next step and freeze once a curve holds 4 h.
    let (mut iob_last, mut zt_last, mut cob_last, mut uam_last) = (bg, bg, bg, bg);
    // Final step values, which the average forecast blends.
    let (mut iob_final, mut cob_final, mut uam_final) = (bg, bg, bg);
    let mut m = Minima {
        iob_guard: f64::INFINITY,
        cob_guard: f64::INFINITY,
        uam_guard: f64::INFINITY,
        zt_guard: f64::INFINITY,
        max_iob: bg,
        ..Minima::default()
    };
    let mut uam_ticks = 0usize;

    let isf_at = |prev: f64| input.log_isf.map_or(input.sens, |l| l.isf_at(prev));

    for tick in input.ticks {
        let len = iob_curve.len() as f64;
        let pred_bgi = round_to(-tick.activity * isf_at(iob_last) * 5.0, 2);
        let zt_bgi = round_to(-tick.zero_temp_activity * isf_at(zt_last) * 5.0, 2);
        let uam_bgi = round_to(-tick.activity * isf_at(uam_last) * 5.0, 2);

        let pred_dev = carbs.ci * (1.0 - (len / 12.0).min(1.0));
        let iob_pred = iob_last + pred_bgi + pred_dev;
        let zt_pred = zt_last + zt_bgi;

        let pred_ci = (carbs.ci.max(0.0) * (1.0 - len / (carbs.cid * 2.0).max(1.0))).max(0.0);
        let intervals = len.min(carbs.absorption_hours * 12.0 - len);
        let remaining_ci = (intervals / (carbs.absorption_hours / 2.0 * 12.0) * carbs.remaining_ci_peak).max(0.0);
        let cob_pred = cob_last + pred_bgi + pred_dev.min(0.0) + pred_ci + remaining_ci;

        let decay_uci = (uci * (1.0 - len / 36.0)).max(0.0);
        let pred_uci = (uci + len * slope).max(0.0).min(decay_uci);
        if pred_uci > 0.0 {
            uam_ticks = iob_curve.len() + 1;
        }
        let uam_pred = uam_last + uam_bgi + pred_dev.min(0.0) + pred_uci;

        if iob_curve.len() < MAX_POINTS {
            iob_curve.push(iob_pred);
            iob_last = iob_pred;
        }
        if cob_curve.len() < MAX_POINTS {
            cob_curve.push(cob_pred);
            cob_last = cob_pred;
        }
        if uam_curve.len() < MAX_POINTS {
            uam_curve.push(uam_pred);
            uam_last = uam_pred;
        }
        if zt_curve.len() < MAX_POINTS {
            zt_curve.push(zt_pred);
            zt_last = zt_pred;
        }
        (iob_final, cob_final, uam_final) = (iob_pred, cob_pred, uam_pred);

        m.cob_guard = m.cob_guard.min(round0(cob_pred));
        m.uam_guard = m.uam_guard.min(round0(uam_pred));
        m.iob_guard = m.iob_guard.min(round0(iob_pred));
        m.zt_guard = m.zt_guard.min(round0(zt_pred));

        let n = iob_curve.len();
        if n > 18 {
            m.iob = Some(m.iob.map_or(round0(iob_pred), |v| v.min(round0(iob_pred))));
        }
        m.max_iob = m.max_iob.max(iob_pred);
        let carb_curve = carbs.has_carb_curve();
        if carb_curve && n > 18 {
            m.cob = Some(m.cob.map_or(round0(cob_pred), |v| v.min(round0(cob_pred))));
        }
        if carb_curve && cob_pred > m.max_iob {
            m.max_cob = Some(m.max_cob.map_or(cob_pred, |v| v.max(cob_pred)));
        }
        if input.enable_uam && uam_curve.len() > 12 {
            m.uam = Some(m.uam.map_or(round0(uam_pred), |v| v.min(round0(uam_pred))));
        }
    }

    let clamp_all = |c: &mut Vec<f64>| c.iter_mut().for_each(|v| *v = clamp_bg(*v));
    clamp_all(&mut iob_curve);
    clamp_all(&mut zt_curve);
    clamp_all(&mut cob_curve);
    clamp_all(&mut uam_curve);
    trim_flat_tail(&mut iob_curve, 12);
    trim_zero_temp(&mut zt_curve, input.target_bg);

    let mut eventual = eventual_bg;
    let last_iob_pred_bg = round0(iob_curve.last().copied().unwrap_or(bg));
    let last_zt_pred_bg = round0(zt_curve.last().copied().unwrap_or(bg));
    let mut last_cob_pred_bg = None;
    let mut last_uam_pred_bg = None;

    let cob_shown = input.meal.meal_cob > 0.0 && carbs.active();
    let cob_out = cob_shown.then(|| {
        trim_flat_tail(&mut cob_curve, 12);
        let last = round0(cob_curve.last().copied().unwrap_or(bg));
        last_cob_pred_bg = Some(last);
        eventual = eventual.max(last);
        cob_curve
    });
    let uam_shown = carbs.active() && input.enable_uam;
    let uam_out = uam_shown.then(|| {
        trim_flat_tail(&mut uam_curve, 12);
        let last = round0(uam_curve.last().copied().unwrap_or(bg));
        last_uam_pred_bg = Some(last);
        eventual = eventual.max(last);
        uam_curve
    });

    let floor = |v: Option<f64>| v.map(|x| x.max(BG_FLOOR));
    let min_iob = floor(m.iob);
    let min_cob = floor(m.cob);
    let min_uam = floor(m.uam);

    let meal = input.meal;
    let fraction_left = if meal.carbs > 0.0 {
        meal.meal_cob / meal.carbs
    } else {
        0.0
    };

    let mut avg_pred_bg = match (min_uam, min_cob) {
        (Some(_), Some(_)) => (1.0 - fraction_left) * uam_final + fraction_left * cob_final,
        (None, Some(_)) => f64::midpoint(iob_final, cob_final),
        (Some(_), None) => f64::midpoint(iob_final, uam_final),
        (None, None) => iob_final,
    };
    avg_pred_bg = round0(avg_pred_bg);
    if m.zt_guard > avg_pred_bg {
        avg_pred_bg = m.zt_guard;
    }

    let min_guard_bg = round0(if carbs.has_carb_curve() {
        if input.enable_uam {
            fraction_left * m.cob_guard + (1.0 - fraction_left) * m.uam_guard
        } else {
            m.cob_guard
        }
    } else if input.enable_uam {
        m.uam_guard
    } else {
        m.iob_guard
    });

    let uam_or_inf = min_uam.unwrap_or(f64::INFINITY);
    let threshold = input.threshold;
    let mut min_zt_uam = uam_or_inf;
    if m.zt_guard < threshold {
        min_zt_uam = f64::midpoint(uam_or_inf, m.zt_guard);
    } else if m.zt_guard < input.target_bg {
        let blend = (m.zt_guard - threshold) / (input.target_bg - threshold);
        let blended = uam_or_inf * blend + m.zt_guard * (1.0 - blend);
        min_zt_uam = f64::midpoint(uam_or_inf, blended);
    } else if m.zt_guard > uam_or_inf {
        min_zt_uam = f64::midpoint(uam_or_inf, m.zt_guard);
    }
    let min_zt_uam = round0(min_zt_uam);

    let iob_or_inf = min_iob.map_or(f64::INFINITY, round0);
    let mut min_pred_bg = iob_or_inf;
    if meal.carbs > 0.0 {
        min_pred_bg = match min_cob {
            Some(cob) if !input.enable_uam => round0(iob_or_inf.max(cob)),
            Some(cob) => {
                let blended = fraction_left * cob + (1.0 - fraction_left) * min_zt_uam;
                round0(iob_or_inf.max(cob).max(blended))
            }
            None if input.enable_uam => min_zt_uam,
            None => min_guard_bg,
        };
    } else if input.enable_uam {
        min_pred_bg = round0(iob_or_inf.max(min_zt_uam));
    }
    min_pred_bg = min_pred_bg.min(avg_pred_bg);
    if let Some(max_cob) = m.max_cob
        && max_cob > bg
    {
        min_pred_bg = min_pred_bg.min(max_cob);
    }

    tracing::debug!(
        min_pred_bg,
        min_guard_bg,
        avg_pred_bg,
        eventual,
        naive_eventual_bg,
        "predictions"
    );
    Predictions {
        curves: PredictedCurves {
            iob: iob_curve,
            zt: zt_curve,
            cob: cob_out,
            uam: uam_out,
        },
        carbs,
        eventual_bg: eventual,
        min_pred_bg,
        min_guard_bg,
        avg_pred_bg,
        min_iob_pred_bg: min_iob,
        last_iob_pred_bg,
        last_cob_pred_bg,
        last_uam_pred_bg,
        last_zt_pred_bg,
        uam_duration_hours: round_to(uam_ticks as f64 * 5.0 / 60.0, 1),
    }
}
