//! Runtime settings for one decision cycle.
//!
//! These mirror the `oref_config` tables but hold resolved values (derived
//! maxima, schedules) and are what every stage of the engine reads.

use crate::schedule::{BasalSchedule, CarbRatioSchedule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Units {
    #[default]
    MgDl,
    MmolL,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsulinCurve {
    #[default]
    RapidActing,
    UltraRapid,
    Bilinear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CgmGuardStyle {
    #[default]
    Neutral,
    Cancel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlatCgmRule {
    #[default]
    Duration,
    ZeroDelta,
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub current_basal: f64,
    pub max_basal: f64,
    pub max_daily_basal: f64,
    pub max_iob: f64,
    pub sens: f64,
    pub carb_ratio: f64,
    pub min_bg: f64,
    pub max_bg: f64,
    pub temptarget_set: bool,
    pub units: Units,
    pub autosens_min: f64,
    pub autosens_max: f64,
    pub model: Option<String>,
    pub bolus_increment: f64,
    pub max_daily_safety_multiplier: f64,
    pub current_basal_safety_multiplier: f64,
    pub remaining_carbs_cap: f64,
    pub remaining_carbs_fraction: f64,
    /// g/h; observed carb impact is capped at this rate times the CSF.
    pub max_carb_absorption_rate: f64,
    pub carbs_req_threshold: f64,
    pub basal_schedule: BasalSchedule,
    pub carb_ratios: CarbRatioSchedule,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            current_basal: 1.0,
            max_basal: 3.5,
            max_daily_basal: 1.0,
            max_iob: 3.0,
            sens: 50.0,
            carb_ratio: 10.0,
            min_bg: 100.0,
            max_bg: 100.0,
            temptarget_set: false,
            units: Units::MgDl,
            autosens_min: 0.7,
            autosens_max: 1.2,
            model: None,
            bolus_increment: 0.1,
            max_daily_safety_multiplier: 3.0,
            current_basal_safety_multiplier: 4.0,
            remaining_carbs_cap: 90.0,
            remaining_carbs_fraction: 1.0,
            max_carb_absorption_rate: 30.0,
            carbs_req_threshold: 1.0,
            basal_schedule: BasalSchedule::constant(1.0),
            carb_ratios: CarbRatioSchedule::constant(10.0),
        }
    }
}

impl Profile {
    /// Normal (non temp-target) target used by the temp-target ratio and
    /// the acceleration brake.
    pub fn profile_target(&self) -> f64 {
        (self.min_bg + self.max_bg) / 2.0
    }
}

#[derive(Debug, Clone)]
pub struct TargetPolicy {
    pub exercise_mode: bool,
    pub high_temptarget_raises_sensitivity: bool,
    pub low_temptarget_lowers_sensitivity: bool,
    pub sensitivity_raises_target: bool,
    pub resistance_lowers_target: bool,
    pub half_basal_exercise_target: f64,
    pub noisy_cgm_target_multiplier: f64,
    pub enable_autosens: bool,
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self {
            exercise_mode: false,
            high_temptarget_raises_sensitivity: false,
            low_temptarget_lowers_sensitivity: false,
            sensitivity_raises_target: true,
            resistance_lowers_target: false,
            half_basal_exercise_target: 160.0,
            noisy_cgm_target_multiplier: 1.3,
            enable_autosens: true,
        }
    }
}

impl TargetPolicy {
    pub fn exercise_setting(&self) -> bool {
        self.exercise_mode || self.high_temptarget_raises_sensitivity
    }
}

#[derive(Debug, Clone)]
pub struct SmbPolicy {
    pub enable_always: bool,
    pub enable_with_cob: bool,
    pub enable_after_carbs: bool,
    pub enable_with_temptarget: bool,
    pub enable_high_bg: bool,
    pub high_bg_target: f64,
    pub allow_with_high_temptarget: bool,
    pub a52_risk_enable: bool,
    pub max_smb_basal_minutes: Option<f64>,
    pub max_uam_smb_basal_minutes: Option<f64>,
    pub interval_minutes: Option<f64>,
    pub enable_uam: bool,
    pub delivery_ratio: f64,
    pub threshold_ratio: f64,
    pub threshold_setting: Option<f64>,
    pub max_delta_bg_threshold: Option<f64>,
    pub skip_neutral_temps: bool,
    pub floating_carbs: bool,
}

impl Default for SmbPolicy {
    fn default() -> Self {
        Self {
            enable_always: false,
            enable_with_cob: false,
            enable_after_carbs: false,
            enable_with_temptarget: false,
            enable_high_bg: false,
            high_bg_target: 110.0,
            allow_with_high_temptarget: false,
            a52_risk_enable: false,
            max_smb_basal_minutes: Some(30.0),
            max_uam_smb_basal_minutes: Some(30.0),
            interval_minutes: None,
            enable_uam: false,
            delivery_ratio: 0.5,
            threshold_ratio: 0.5,
            threshold_setting: None,
            max_delta_bg_threshold: None,
            skip_neutral_temps: false,
            floating_carbs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DynamicIsfSettings {
    pub enabled: bool,
    pub sigmoid: bool,
    pub adjustment_factor: f64,
    pub weight_percentage: f64,
    pub enable_dynamic_cr: bool,
    pub tdd_adjust_basal: bool,
    pub curve: InsulinCurve,
    pub use_custom_peak_time: bool,
    pub insulin_peak_time: f64,
}

impl Default for DynamicIsfSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sigmoid: false,
            adjustment_factor: 0.8,
            weight_percentage: 0.65,
            enable_dynamic_cr: false,
            tdd_adjust_basal: false,
            curve: InsulinCurve::RapidActing,
            use_custom_peak_time: false,
            insulin_peak_time: 75.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AutoIsfSettings {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
    pub off_sport: bool,
    pub with_cob: bool,
    pub accel_enabled: bool,
    pub accel_weight: f64,
    pub brake_weight: f64,
    pub lower_range_weight: f64,
    pub higher_range_weight: f64,
    pub delta_range_weight: f64,
    pub pp_always: bool,
    pub pp_hours: f64,
    pub pp_weight: f64,
    pub dura_weight: f64,
    pub smb_ratio_min: f64,
    pub smb_ratio_max: f64,
    pub smb_ratio_bg_range: f64,
    pub smb_max_range_extension: f64,
    pub iob_threshold_percent: f64,
    pub even_on_odd_off: bool,
    pub even_on_odd_off_always: bool,
}

impl Default for AutoIsfSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 1.0,
            max: 1.0,
            off_sport: true,
            with_cob: false,
            accel_enabled: false,
            accel_weight: 0.0,
            brake_weight: 0.0,
            lower_range_weight: 0.0,
            higher_range_weight: 0.0,
            delta_range_weight: 0.0,
            pp_always: false,
            pp_hours: 3.0,
            pp_weight: 0.0,
            dura_weight: 0.0,
            smb_ratio_min: 0.5,
            smb_ratio_max: 0.5,
            smb_ratio_bg_range: 0.0,
            smb_max_range_extension: 1.0,
            iob_threshold_percent: 100.0,
            even_on_odd_off: false,
            even_on_odd_off_always: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct B30Settings {
    pub enabled: bool,
    pub start_bolus: f64,
    pub target: f64,
    pub factor: f64,
    pub upper_bg: f64,
    pub upper_delta: f64,
    pub duration: f64,
}

impl Default for B30Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_bolus: 1.5,
            target: 90.0,
            factor: 5.0,
            upper_bg: 130.0,
            upper_delta: 8.0,
            duration: 30.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KetoSettings {
    pub enabled: bool,
    pub variable: bool,
    pub basal_percent: f64,
    pub absolute: bool,
    pub basal_absolute: f64,
}

impl Default for KetoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            variable: false,
            basal_percent: 0.2,
            absolute: false,
            basal_absolute: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverrideSettings {
    pub enabled: bool,
    pub percentage: f64,
    pub isf_and_cr: bool,
    pub isf: bool,
    pub cr: bool,
    pub target: f64,
    pub smb_is_off: bool,
    pub smb_is_always_off: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub advanced: bool,
    pub smb_minutes: Option<f64>,
    pub uam_minutes: Option<f64>,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            percentage: 100.0,
            isf_and_cr: true,
            isf: false,
            cr: false,
            target: 0.0,
            smb_is_off: false,
            smb_is_always_off: true,
            start_hour: 0,
            end_hour: 23,
            advanced: false,
            smb_minutes: None,
            uam_minutes: None,
        }
    }
}

impl OverrideSettings {
    /// Basal/ISF/CR multiplier of the active override, 1.0 when none.
    pub fn factor(&self) -> f64 {
        if self.enabled {
            self.percentage / 100.0
        } else {
            1.0
        }
    }

    /// Whether the SMB switch turns micro-boluses off at local `hour`.
    pub fn smb_off_at(&self, hour: u32) -> bool {
        if !(self.enabled && self.smb_is_off) {
            return false;
        }
        if self.smb_is_always_off {
            return true;
        }
        if self.start_hour <= self.end_hour {
            (self.start_hour..=self.end_hour).contains(&hour)
        } else {
            // window wraps past midnight
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GuardSettings {
    pub cgm_guard_style: CgmGuardStyle,
    pub flat_cgm_rule: FlatCgmRule,
}

/// Aggregate read by the engine.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub profile: Profile,
    pub targets: TargetPolicy,
    pub smb: SmbPolicy,
    pub dynamic_isf: DynamicIsfSettings,
    pub autoisf: AutoIsfSettings,
    pub b30: B30Settings,
    pub keto: KetoSettings,
    pub overrides: OverrideSettings,
    pub guards: GuardSettings,
}
