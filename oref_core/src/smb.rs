//! Super-micro-bolus enablement and sizing.

use crate::config::{Settings, Units};
use crate::reason::convert_bg;
use crate::status::SmbStatus;
use crate::types::MealData;
use crate::util::round_to;

const DEFAULT_INTERVAL_MINUTES: f64 = 3.0;

/// Regular enablement rules.
///
/// - Never without micro-bolus permission.
/// - Never with a high temp target unless allowed, nor after a bolus
///   wizard entry unless A52 risk is accepted.
/// - Otherwise on when any enabling condition holds.
pub fn enable_smb(settings: &Settings, micro_bolus_allowed: bool, meal: &MealData, bg: f64, target_bg: f64) -> bool {
    let smb = &settings.smb;
    let tt = settings.profile.temptarget_set;
    if !micro_bolus_allowed {
        tracing::debug!("SMB disabled (!microBolusAllowed)");
        return false;
    }
    if !smb.allow_with_high_temptarget && tt && target_bg > 100.0 {
        tracing::debug!(target_bg, "SMB disabled due to high temptarget");
        return false;
    }
    if meal.bw_found && !smb.a52_risk_enable {
        tracing::debug!("SMB disabled due to Bolus Wizard activity in the last 6 hours");
        return false;
    }
    let reason = if smb.enable_always {
        Some("always")
    } else if smb.enable_with_cob && meal.meal_cob > 0.0 {
        Some("with COB")
    } else if smb.enable_after_carbs && meal.carbs > 0.0 {
        Some("after carbs")
    } else if smb.enable_with_temptarget && tt && target_bg < 100.0 {
        Some("with low temptarget")
    } else if smb.enable_high_bg && bg >= smb.high_bg_target {
        Some("for high BG")
    } else {
        None
    };
    match reason {
        Some(why) => {
            tracing::debug!(why, "SMB enabled");
            true
        }
        None => {
            tracing::debug!("SMB disabled (no enableSMB preferences active or no condition satisfied)");
            false
        }
    }
}

/// Share of max IOB above which the parity gate holds micro-boluses.
pub fn iob_threshold_percent(settings: &Settings) -> f64 {
    let pct = settings.autoisf.iob_threshold_percent;
    if pct > 0.0 && pct < 100.0 { pct } else { 100.0 }
}

fn target_is_even(target_bg: f64, units: Units) -> bool {
    let shown = convert_bg(target_bg, units);
    match units {
        Units::MmolL => (shown * 10.0).round() as i64 % 2 == 0,
        Units::MgDl => shown as i64 % 2 == 0,
    }
}

/// Parity / IOB-threshold gate evaluated before the regular rules.
pub fn loop_smb(settings: &Settings, micro_bolus_allowed: bool, iob: f64, boost_idle: bool, exercise_ratio: f64) -> SmbStatus {
    if !boost_idle {
        return SmbStatus::AimiB30;
    }
    if !micro_bolus_allowed {
        return SmbStatus::Oref;
    }
    let p = &settings.profile;
    let a = &settings.autoisf;
    let tt = p.temptarget_set;
    let gated = a.enabled
        && ((tt && a.even_on_odd_off) || (p.min_bg == p.max_bg && a.even_on_odd_off_always && !tt));
    if !gated {
        return SmbStatus::Oref;
    }
    let target = p.min_bg;
    if !target_is_even(target, p.units) {
        tracing::info!(target, "SMB disabled: odd target");
        return SmbStatus::Blocked;
    }
    if p.max_iob == 0.0 {
        tracing::info!("SMB disabled: max IOB is zero");
        return SmbStatus::Blocked;
    }
    let share = iob_threshold_percent(settings) / 100.0;
    if share < iob / (p.max_iob * exercise_ratio) {
        tracing::info!(iob, share, "SMB disabled: IOB above threshold");
        return SmbStatus::IobTh;
    }
    if target < 100.0 {
        SmbStatus::FullLoop
    } else {
        SmbStatus::Enforced
    }
}

/// Portion of the insulin requirement delivered as a micro-bolus.
///
/// - Without autoISF this is the configured delivery ratio.
/// - With autoISF it ramps linearly from `smb_ratio_min` at target to
///   `smb_ratio_max` at target + range; full-loop mode never goes below
///   the configured delivery ratio.
pub fn delivery_ratio(settings: &Settings, bg: f64, target_bg: f64, status: SmbStatus) -> f64 {
    let fixed = settings.smb.delivery_ratio;
    let a = &settings.autoisf;
    if !a.enabled {
        return fixed;
    }
    let (lo, hi) = (a.smb_ratio_min, a.smb_ratio_max);
    let mut range = a.smb_ratio_bg_range;
    if range < 10.0 {
        range /= crate::util::MMOL_PER_MGDL;
    }
    if range == 0.0 {
        return fixed;
    }
    let ramp = (lo + (hi - lo) * (bg - target_bg) / range).clamp(lo.min(hi), lo.max(hi));
    let ratio = if bg <= target_bg {
        lo
    } else if bg >= target_bg + range {
        hi
    } else {
        ramp
    };
    if status == SmbStatus::FullLoop {
        ratio.max(fixed)
    } else {
        ratio
    }
}

/// Minutes between micro-boluses, within [1, 10].
pub fn interval_minutes(settings: &Settings) -> f64 {
    settings
        .smb
        .interval_minutes
        .map_or(DEFAULT_INTERVAL_MINUTES, |m| m.clamp(1.0, 10.0))
}

/// Largest micro-bolus allowed this cycle.
///
/// `basal` is the profile basal with any override applied.
pub fn max_bolus(settings: &Settings, iob: f64, meal_insulin_req: f64, basal: f64) -> f64 {
    let o = &settings.overrides;
    let range = if settings.autoisf.enabled {
        settings.autoisf.smb_max_range_extension
    } else {
        1.0
    };
    let (smb_minutes, uam_minutes) = if o.enabled && o.advanced {
        (
            o.smb_minutes.or(settings.smb.max_smb_basal_minutes),
            o.uam_minutes.or(settings.smb.max_uam_smb_basal_minutes),
        )
    } else {
        (settings.smb.max_smb_basal_minutes, settings.smb.max_uam_smb_basal_minutes)
    };
    match smb_minutes {
        None => round_to(range * basal * 30.0 / 60.0, 1),
        Some(_) if iob > meal_insulin_req && iob > 0.0 => match uam_minutes {
            Some(m) => round_to(range * basal * m / 60.0, 1),
            None => round_to(basal * 30.0 / 60.0, 1),
        },
        Some(m) => round_to(range * basal * m / 60.0, 1),
    }
}

/// Sizing of one micro-bolus cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MicroBolusPlan {
    pub units: f64,
    pub max_bolus: f64,
    pub iob_th_capped: bool,
    /// Low temp to run alongside, `(rate, minutes)`.
    pub low_temp: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy)]
pub struct MicroBolusInputs {
    pub insulin_req: f64,
    pub iob: f64,
    pub cob: f64,
    pub carb_ratio: f64,
    /// Ratio-adjusted basal for the low temp.
    pub basal: f64,
    pub target_bg: f64,
    pub naive_eventual_bg: f64,
    pub min_iob_pred_bg: Option<f64>,
    pub sens: f64,
    pub delivery_ratio: f64,
    pub exercise_ratio: f64,
    pub status: SmbStatus,
}

pub fn plan_micro_bolus(settings: &Settings, input: MicroBolusInputs) -> MicroBolusPlan {
    let p = &settings.profile;
    let profile_basal = p.current_basal * settings.overrides.factor();
    let meal_insulin_req = round_to(input.cob / input.carb_ratio, 3);
    let max_bolus = max_bolus(settings, input.iob, meal_insulin_req, profile_basal);

    let mut units = (input.insulin_req * input.delivery_ratio).min(max_bolus);
    let mut iob_th_capped = false;
    if input.status.forces_smb() {
        let virtual_th = iob_threshold_percent(settings) / 100.0 * 1.3 * p.max_iob * input.exercise_ratio;
        if units > virtual_th - input.iob {
            units = virtual_th - input.iob;
            iob_th_capped = true;
        }
    }
    let increment = p.bolus_increment;
    units = (units / increment).floor() * increment;
    units = round_to(units, 3);

    let mut duration = input.min_iob_pred_bg.map_or(0.0, |min_iob| {
        let worst = (input.target_bg - (input.naive_eventual_bg + min_iob) / 2.0) / input.sens;
        crate::util::round0(60.0 * worst / profile_basal)
    });
    if input.insulin_req > 0.0 && units < increment {
        duration = 0.0;
    }
    let low_temp = if duration <= 0.0 {
        None
    } else if duration >= 30.0 {
        let minutes = (crate::util::round0(duration / 30.0) * 30.0).min(60.0);
        Some((0.0, minutes))
    } else {
        Some((round_to(input.basal * duration / 30.0, 2), 30.0))
    };
    tracing::debug!(units, max_bolus, iob_th_capped, ?low_temp, "micro-bolus plan");
    MicroBolusPlan {
        units,
        max_bolus,
        iob_th_capped,
        low_temp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smb_settings() -> Settings {
        let mut s = Settings::default();
        s.smb.enable_always = true;
        s
    }

    #[test]
    fn never_enabled_without_permission() {
        let s = smb_settings();
        assert!(!enable_smb(&s, false, &MealData::default(), 180.0, 100.0));
        assert!(enable_smb(&s, true, &MealData::default(), 180.0, 100.0));
    }

    #[test]
    fn high_temp_target_blocks_unless_allowed() {
        let mut s = smb_settings();
        s.profile.temptarget_set = true;
        assert!(!enable_smb(&s, true, &MealData::default(), 180.0, 140.0));
        s.smb.allow_with_high_temptarget = true;
        assert!(enable_smb(&s, true, &MealData::default(), 180.0, 140.0));
    }

    #[test]
    fn bolus_wizard_blocks_without_a52() {
        let s = smb_settings();
        let meal = MealData {
            bw_found: true,
            ..MealData::default()
        };
        assert!(!enable_smb(&s, true, &meal, 180.0, 100.0));
    }

    #[test]
    fn odd_target_blocks_and_even_enforces() {
        let mut s = Settings::default();
        s.autoisf.enabled = true;
        s.autoisf.even_on_odd_off_always = true;
        s.profile.min_bg = 101.0;
        s.profile.max_bg = 101.0;
        assert_eq!(loop_smb(&s, true, 0.0, true, 1.0), SmbStatus::Blocked);
        s.profile.min_bg = 102.0;
        s.profile.max_bg = 102.0;
        assert_eq!(loop_smb(&s, true, 0.0, true, 1.0), SmbStatus::Enforced);
        assert_eq!(loop_smb(&s, true, 3.5, true, 1.0), SmbStatus::IobTh);
        assert_eq!(loop_smb(&s, true, 0.0, false, 1.0), SmbStatus::AimiB30);
    }

    #[test]
    fn max_bolus_uses_uam_minutes_when_iob_exceeds_meal_need() {
        let mut s = Settings::default();
        s.smb.max_smb_basal_minutes = Some(60.0);
        s.smb.max_uam_smb_basal_minutes = Some(90.0);
        assert_eq!(max_bolus(&s, 0.5, 1.0, 1.0), 1.0);
        assert_eq!(max_bolus(&s, 2.0, 1.0, 1.0), 1.5);
        s.smb.max_smb_basal_minutes = None;
        assert_eq!(max_bolus(&s, 2.0, 1.0, 1.0), 0.5);
    }

    #[test]
    fn micro_bolus_floors_to_increments() {
        let s = Settings::default();
        let plan = plan_micro_bolus(
            &s,
            MicroBolusInputs {
                insulin_req: 0.77,
                iob: 0.0,
                cob: 0.0,
                carb_ratio: 10.0,
                basal: 1.0,
                target_bg: 100.0,
                naive_eventual_bg: 180.0,
                min_iob_pred_bg: Some(180.0),
                sens: 50.0,
                delivery_ratio: 0.5,
                exercise_ratio: 1.0,
                status: SmbStatus::Oref,
            },
        );
        assert_eq!(plan.units, 0.3);
        assert_eq!(plan.low_temp, None);
    }

    #[test]
    fn delivery_ratio_ramps_over_bg_range() {
        let mut s = Settings::default();
        assert_eq!(delivery_ratio(&s, 200.0, 100.0, SmbStatus::Oref), 0.5);
        s.autoisf.enabled = true;
        s.autoisf.smb_ratio_min = 0.5;
        s.autoisf.smb_ratio_max = 0.7;
        s.autoisf.smb_ratio_bg_range = 40.0;
        assert_eq!(delivery_ratio(&s, 90.0, 100.0, SmbStatus::Oref), 0.5);
        assert!((delivery_ratio(&s, 120.0, 100.0, SmbStatus::Oref) - 0.6).abs() < 1e-9);
        assert_eq!(delivery_ratio(&s, 150.0, 100.0, SmbStatus::Oref), 0.7);
    }
}
