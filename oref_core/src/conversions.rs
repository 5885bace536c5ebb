//! `From` implementations bridging `oref_config` types to `oref_core` types.

use crate::config::{
    AutoIsfSettings, B30Settings, CgmGuardStyle, DynamicIsfSettings, FlatCgmRule, GuardSettings, InsulinCurve,
    KetoSettings, OverrideSettings, Profile, Settings, SmbPolicy, TargetPolicy, Units,
};
use crate::schedule::{BasalSchedule, BasalSegment, CarbRatioEntry, CarbRatioSchedule, CarbUnits};
use crate::types::{
    CurrentTemp, CycleInputs, GlucoseReading, GlucoseStatus, IobData, IobTick, LastTemp, MealData, PumpEvent,
    ReadingKind, TddAverages,
};

// ── Profile ──────────────────────────────────────────────────────────────────

impl From<&oref_config::ProfileCfg> for Profile {
    fn from(c: &oref_config::ProfileCfg) -> Self {
        let basal_schedule = if c.basal_schedule.is_empty() {
            BasalSchedule::constant(c.current_basal)
        } else {
            BasalSchedule::new(
                c.basal_schedule
                    .iter()
                    .map(|b| BasalSegment {
                        start_minutes: b.start,
                        rate: b.rate,
                    })
                    .collect(),
            )
        };
        let carb_ratios = c
            .carb_ratios
            .as_ref()
            .map_or_else(|| CarbRatioSchedule::constant(c.carb_ratio), CarbRatioSchedule::from);
        Self {
            current_basal: c.current_basal,
            max_basal: c.max_basal,
            max_daily_basal: c.max_daily_basal.unwrap_or_else(|| basal_schedule.max_rate()),
            max_iob: c.max_iob,
            sens: c.sens,
            carb_ratio: c.carb_ratio,
            min_bg: c.min_bg,
            max_bg: c.max_bg,
            temptarget_set: c.temptarget_set,
            units: match c.units {
                oref_config::GlucoseUnits::MgDl => Units::MgDl,
                oref_config::GlucoseUnits::MmolL => Units::MmolL,
            },
            autosens_min: c.autosens_min,
            autosens_max: c.autosens_max,
            model: c.model.clone(),
            bolus_increment: c.bolus_increment,
            max_daily_safety_multiplier: c.max_daily_safety_multiplier,
            current_basal_safety_multiplier: c.current_basal_safety_multiplier,
            remaining_carbs_cap: c.remaining_carbs_cap,
            remaining_carbs_fraction: c.remaining_carbs_fraction,
            max_carb_absorption_rate: c.max_carb_absorption_rate,
            carbs_req_threshold: c.carbs_req_threshold,
            basal_schedule,
            carb_ratios,
        }
    }
}

impl From<&oref_config::CarbRatiosCfg> for CarbRatioSchedule {
    fn from(c: &oref_config::CarbRatiosCfg) -> Self {
        let units = match c.units {
            oref_config::CarbUnits::Grams => CarbUnits::Grams,
            oref_config::CarbUnits::Exchanges => CarbUnits::Exchanges,
        };
        Self::new(
            units,
            c.schedule
                .iter()
                .map(|e| CarbRatioEntry {
                    start_minutes: e.start,
                    ratio: e.ratio,
                })
                .collect(),
        )
    }
}

// ── Policies ─────────────────────────────────────────────────────────────────

impl From<&oref_config::TargetsCfg> for TargetPolicy {
    fn from(c: &oref_config::TargetsCfg) -> Self {
        Self {
            exercise_mode: c.exercise_mode,
            high_temptarget_raises_sensitivity: c.high_temptarget_raises_sensitivity,
            low_temptarget_lowers_sensitivity: c.low_temptarget_lowers_sensitivity,
            sensitivity_raises_target: c.sensitivity_raises_target,
            resistance_lowers_target: c.resistance_lowers_target,
            half_basal_exercise_target: c.half_basal_exercise_target,
            noisy_cgm_target_multiplier: c.noisy_cgm_target_multiplier,
            enable_autosens: c.enable_autosens,
        }
    }
}

impl From<&oref_config::SmbCfg> for SmbPolicy {
    fn from(c: &oref_config::SmbCfg) -> Self {
        Self {
            enable_always: c.enable_always,
            enable_with_cob: c.enable_with_cob,
            enable_after_carbs: c.enable_after_carbs,
            enable_with_temptarget: c.enable_with_temptarget,
            enable_high_bg: c.enable_high_bg,
            high_bg_target: c.high_bg_target,
            allow_with_high_temptarget: c.allow_with_high_temptarget,
            a52_risk_enable: c.a52_risk_enable,
            max_smb_basal_minutes: c.max_smb_basal_minutes,
            max_uam_smb_basal_minutes: c.max_uam_smb_basal_minutes,
            interval_minutes: c.interval_minutes,
            enable_uam: c.enable_uam,
            delivery_ratio: c.delivery_ratio,
            threshold_ratio: c.threshold_ratio,
            threshold_setting: c.threshold_setting,
            max_delta_bg_threshold: c.max_delta_bg_threshold,
            skip_neutral_temps: c.skip_neutral_temps,
            floating_carbs: c.floating_carbs,
        }
    }
}

impl From<&oref_config::DynamicIsfCfg> for DynamicIsfSettings {
    fn from(c: &oref_config::DynamicIsfCfg) -> Self {
        Self {
            enabled: c.enabled,
            sigmoid: c.sigmoid,
            adjustment_factor: c.adjustment_factor,
            weight_percentage: c.weight_percentage,
            enable_dynamic_cr: c.enable_dynamic_cr,
            tdd_adjust_basal: c.tdd_adjust_basal,
            curve: match c.curve {
                oref_config::InsulinCurve::RapidActing => InsulinCurve::RapidActing,
                oref_config::InsulinCurve::UltraRapid => InsulinCurve::UltraRapid,
                oref_config::InsulinCurve::Bilinear => InsulinCurve::Bilinear,
            },
            use_custom_peak_time: c.use_custom_peak_time,
            insulin_peak_time: c.insulin_peak_time,
        }
    }
}

impl From<&oref_config::AutoIsfCfg> for AutoIsfSettings {
    fn from(c: &oref_config::AutoIsfCfg) -> Self {
        Self {
            enabled: c.enabled,
            min: c.min,
            max: c.max,
            off_sport: c.off_sport,
            with_cob: c.with_cob,
            accel_enabled: c.bg_accel.enabled,
            accel_weight: c.bg_accel.accel_weight,
            brake_weight: c.bg_accel.brake_weight,
            lower_range_weight: c.lower_range_weight,
            higher_range_weight: c.higher_range_weight,
            delta_range_weight: c.delta_range_weight,
            pp_always: c.pp_always,
            pp_hours: c.pp_hours,
            pp_weight: c.pp_weight,
            dura_weight: c.dura_weight,
            smb_ratio_min: c.smb_ratio.min,
            smb_ratio_max: c.smb_ratio.max,
            smb_ratio_bg_range: c.smb_ratio.bg_range,
            smb_max_range_extension: c.smb_max_range_extension,
            iob_threshold_percent: c.iob_threshold_percent,
            even_on_odd_off: c.even_on_odd_off,
            even_on_odd_off_always: c.even_on_odd_off_always,
        }
    }
}

impl From<&oref_config::B30Cfg> for B30Settings {
    fn from(c: &oref_config::B30Cfg) -> Self {
        Self {
            enabled: c.enabled,
            start_bolus: c.start_bolus,
            target: c.target,
            factor: c.factor,
            upper_bg: c.upper_bg,
            upper_delta: c.upper_delta,
            duration: c.duration,
        }
    }
}

impl From<&oref_config::KetoCfg> for KetoSettings {
    fn from(c: &oref_config::KetoCfg) -> Self {
        Self {
            enabled: c.enabled,
            variable: c.variable,
            basal_percent: c.basal_percent,
            absolute: c.absolute,
            basal_absolute: c.basal_absolute,
        }
    }
}

impl From<&oref_config::OverrideCfg> for OverrideSettings {
    fn from(c: &oref_config::OverrideCfg) -> Self {
        Self {
            enabled: c.enabled,
            percentage: c.percentage,
            isf_and_cr: c.isf_and_cr,
            isf: c.isf,
            cr: c.cr,
            target: c.target,
            smb_is_off: c.smb_is_off,
            smb_is_always_off: c.smb_is_always_off,
            start_hour: c.start_hour,
            end_hour: c.end_hour,
            advanced: c.advanced,
            smb_minutes: c.smb_minutes,
            uam_minutes: c.uam_minutes,
        }
    }
}

impl From<&oref_config::GuardsCfg> for GuardSettings {
    fn from(c: &oref_config::GuardsCfg) -> Self {
        Self {
            cgm_guard_style: match c.cgm_guard_style {
                oref_config::CgmGuardStyle::Neutral => CgmGuardStyle::Neutral,
                oref_config::CgmGuardStyle::Cancel => CgmGuardStyle::Cancel,
            },
            flat_cgm_rule: match c.flat_cgm_rule {
                oref_config::FlatCgmRule::Duration => FlatCgmRule::Duration,
                oref_config::FlatCgmRule::ZeroDelta => FlatCgmRule::ZeroDelta,
            },
        }
    }
}

impl From<&oref_config::Config> for Settings {
    fn from(c: &oref_config::Config) -> Self {
        Self {
            profile: (&c.profile).into(),
            targets: (&c.targets).into(),
            smb: (&c.smb).into(),
            dynamic_isf: (&c.dynamic_isf).into(),
            autoisf: (&c.autoisf).into(),
            b30: (&c.b30).into(),
            keto: (&c.keto).into(),
            overrides: (&c.overrides).into(),
            guards: (&c.guards).into(),
        }
    }
}

// ── Cycle inputs ─────────────────────────────────────────────────────────────

impl From<&oref_config::GlucoseReadingDto> for GlucoseReading {
    fn from(d: &oref_config::GlucoseReadingDto) -> Self {
        let kind = match d.kind.as_deref() {
            Some("cal") => ReadingKind::Calibration,
            _ => ReadingKind::Sgv,
        };
        Self {
            date: d.date,
            glucose: d.glucose,
            device: d.device.clone(),
            kind,
            noise: d.noise,
        }
    }
}

impl From<&oref_config::PumpEventDto> for PumpEvent {
    fn from(d: &oref_config::PumpEventDto) -> Self {
        use oref_config::PumpEventDto as E;
        match *d {
            E::Bolus { timestamp, amount } => Self::Bolus { at: timestamp, amount },
            E::TempBasal { timestamp, rate } => Self::TempBasal { at: timestamp, rate },
            E::TempBasalDuration { timestamp, duration } => Self::TempBasalDuration {
                at: timestamp,
                minutes: duration,
            },
            E::PumpSuspend { timestamp } => Self::PumpSuspend { at: timestamp },
            E::PumpResume { timestamp } => Self::PumpResume { at: timestamp },
            E::Rewind { timestamp } => Self::Rewind { at: timestamp },
            E::Prime { timestamp } => Self::Prime { at: timestamp },
            E::Other => Self::Other,
        }
    }
}

impl From<&oref_config::IobInput> for IobData {
    fn from(d: &oref_config::IobInput) -> Self {
        Self {
            ticks: d
                .ticks
                .iter()
                .map(|t| IobTick {
                    iob: t.iob,
                    activity: t.activity,
                    zero_temp_activity: t.zero_temp_activity,
                })
                .collect(),
            last_temp: d.last_temp.map(|t| LastTemp {
                date: t.date,
                rate: t.rate,
                duration: t.duration,
            }),
            last_bolus_time: d.last_bolus_time,
            bolus_iob: d.bolus_iob,
            basal_iob: d.basal_iob,
        }
    }
}

impl From<&oref_config::MealInput> for MealData {
    fn from(d: &oref_config::MealInput) -> Self {
        Self {
            carbs: d.carbs,
            meal_cob: d.meal_cob,
            last_carb_time: d.last_carb_time,
            bw_found: d.bw_found,
            bw_carbs: d.bw_carbs,
            slope_from_max_deviation: d.slope_from_max_deviation,
            slope_from_min_deviation: d.slope_from_min_deviation,
        }
    }
}

/// Assemble [`CycleInputs`] from a parsed cycle file and an already
/// analyzed glucose window.
pub fn cycle_inputs(
    input: &oref_config::CycleInput,
    now: oref_traits::Timestamp,
    glucose: GlucoseStatus,
) -> crate::error::Result<CycleInputs> {
    let mut b = CycleInputs::builder(now)
        .glucose(glucose)
        .iob((&input.iob).into())
        .meal((&input.meal).into())
        .current_temp(CurrentTemp {
            rate: input.current_temp.rate,
            duration: input.current_temp.duration,
        })
        .pump_history(input.pump_history.iter().map(PumpEvent::from).collect())
        .autosens_ratio(input.autosens_ratio)
        .micro_bolus_allowed(input.micro_bolus_allowed);
    if let Some(r) = input.reservoir {
        b = b.reservoir(r);
    }
    if let Some(t) = input.tdd_averages {
        b = b.tdd_averages(TddAverages {
            weighted_average: t.weighted_average,
            average_total: t.average_total,
        });
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        [profile]
        current_basal = 0.8
        max_basal = 3.0
        max_iob = 2.5
        sens = 45
        carb_ratio = 12
        min_bg = 100
        max_bg = 110
        units = "mmol/L"
        basal_schedule = [
            { start = "00:00", rate = 0.8 },
            { start = "06:00", rate = 1.1 },
        ]

        [override]
        enabled = true
        percentage = 80
    "#;

    #[test]
    fn config_maps_onto_settings() {
        let cfg = oref_config::load_toml(CONFIG).unwrap();
        let s = Settings::from(&cfg);
        assert_eq!(s.profile.units, Units::MmolL);
        assert_eq!(s.profile.max_daily_basal, 1.1);
        assert_eq!(s.profile.basal_schedule.segments().len(), 2);
        assert_eq!(s.overrides.factor(), 0.8);
    }

    #[test]
    fn calibration_records_keep_their_kind() {
        let dto = oref_config::GlucoseReadingDto {
            date: chrono::DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap(),
            glucose: Some(120.0),
            device: None,
            kind: Some("cal".into()),
            noise: None,
        };
        assert_eq!(GlucoseReading::from(&dto).kind, ReadingKind::Calibration);
    }
}
