#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and input parsing for the loop decision core.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Cycle inputs (glucose window, IOB ticks, meal data, pump history) are
//!   read from JSON, see [`input`].
//! - Glucose readings can also be loaded from a strict-header CSV, see
//!   [`load_readings_csv`].
use serde::Deserialize;
use serde::de::Deserializer;

pub mod input;

pub use input::{
    CurrentTempInput, CycleInput, GlucoseReadingDto, IobInput, IobTickDto, LastTempDto, MealInput,
    PumpEventDto, TddAveragesInput, load_cycle_input_json, load_pump_history_json,
    load_readings_json,
};

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub enum GlucoseUnits {
    #[default]
    #[serde(rename = "mg/dL", alias = "mg/dl")]
    MgDl,
    #[serde(rename = "mmol/L", alias = "mmol/l")]
    MmolL,
}

/// One scheduled basal segment. `start` accepts "HH:MM", "HH:MM:SS" or
/// minutes after midnight.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct BasalEntryCfg {
    #[serde(deserialize_with = "de_time_of_day")]
    pub start: u32,
    pub rate: f64,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CarbRatioEntryCfg {
    #[serde(deserialize_with = "de_time_of_day")]
    pub start: u32,
    pub ratio: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CarbUnits {
    #[default]
    Grams,
    Exchanges,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CarbRatiosCfg {
    #[serde(default)]
    pub units: CarbUnits,
    pub schedule: Vec<CarbRatioEntryCfg>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileCfg {
    pub current_basal: f64,
    pub max_basal: f64,
    /// Largest scheduled basal; derived from `basal_schedule` when absent.
    #[serde(default)]
    pub max_daily_basal: Option<f64>,
    pub max_iob: f64,
    pub sens: f64,
    pub carb_ratio: f64,
    pub min_bg: f64,
    pub max_bg: f64,
    #[serde(default)]
    pub temptarget_set: bool,
    #[serde(default)]
    pub units: GlucoseUnits,
    #[serde(default = "default_autosens_min")]
    pub autosens_min: f64,
    #[serde(default = "default_autosens_max")]
    pub autosens_max: f64,
    /// Pump model id used for basal rounding (e.g. "554", "723").
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_bolus_increment")]
    pub bolus_increment: f64,
    #[serde(default = "default_daily_multiplier")]
    pub max_daily_safety_multiplier: f64,
    #[serde(default = "default_current_multiplier")]
    pub current_basal_safety_multiplier: f64,
    #[serde(default = "default_remaining_carbs_cap")]
    pub remaining_carbs_cap: f64,
    #[serde(default = "default_one")]
    pub remaining_carbs_fraction: f64,
    /// Ceiling on observed carb absorption, g/h.
    #[serde(default = "default_max_carb_absorption_rate")]
    pub max_carb_absorption_rate: f64,
    #[serde(default = "default_one")]
    pub carbs_req_threshold: f64,
    #[serde(default)]
    pub basal_schedule: Vec<BasalEntryCfg>,
    #[serde(default)]
    pub carb_ratios: Option<CarbRatiosCfg>,
}

fn default_autosens_min() -> f64 {
    0.7
}
fn default_autosens_max() -> f64 {
    1.2
}
fn default_bolus_increment() -> f64 {
    0.1
}
fn default_daily_multiplier() -> f64 {
    3.0
}
fn default_current_multiplier() -> f64 {
    4.0
}
fn default_remaining_carbs_cap() -> f64 {
    90.0
}
fn default_max_carb_absorption_rate() -> f64 {
    30.0
}
fn default_one() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TargetsCfg {
    pub exercise_mode: bool,
    pub high_temptarget_raises_sensitivity: bool,
    pub low_temptarget_lowers_sensitivity: bool,
    pub sensitivity_raises_target: bool,
    pub resistance_lowers_target: bool,
    pub half_basal_exercise_target: f64,
    pub noisy_cgm_target_multiplier: f64,
    pub enable_autosens: bool,
}

impl Default for TargetsCfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SmbCfg {
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
    /// Minutes between micro-boluses; clamped to 1..=10.
    pub interval_minutes: Option<f64>,
    pub enable_uam: bool,
    pub delivery_ratio: f64,
    pub threshold_ratio: f64,
    /// Absolute low threshold in mg/dL; honored within [65, 120].
    pub threshold_setting: Option<f64>,
    /// Largest tolerated delta as a fraction of BG; capped at 0.4.
    pub max_delta_bg_threshold: Option<f64>,
    pub skip_neutral_temps: bool,
    pub floating_carbs: bool,
}

impl Default for SmbCfg {
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InsulinCurve {
    #[default]
    RapidActing,
    UltraRapid,
    Bilinear,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DynamicIsfCfg {
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

impl Default for DynamicIsfCfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BgAccelCfg {
    pub enabled: bool,
    pub accel_weight: f64,
    pub brake_weight: f64,
}

impl Default for BgAccelCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            accel_weight: 0.0,
            brake_weight: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SmbRatioCfg {
    pub min: f64,
    pub max: f64,
    /// Width of the interpolation band above target; values < 10 are mmol/L.
    pub bg_range: f64,
}

impl Default for SmbRatioCfg {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 0.5,
            bg_range: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AutoIsfCfg {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
    pub off_sport: bool,
    pub with_cob: bool,
    pub bg_accel: BgAccelCfg,
    pub lower_range_weight: f64,
    pub higher_range_weight: f64,
    pub delta_range_weight: f64,
    pub pp_always: bool,
    pub pp_hours: f64,
    pub pp_weight: f64,
    pub dura_weight: f64,
    pub smb_ratio: SmbRatioCfg,
    pub smb_max_range_extension: f64,
    pub iob_threshold_percent: f64,
    pub even_on_odd_off: bool,
    pub even_on_odd_off_always: bool,
}

impl Default for AutoIsfCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 1.0,
            max: 1.0,
            off_sport: true,
            with_cob: false,
            bg_accel: BgAccelCfg::default(),
            lower_range_weight: 0.0,
            higher_range_weight: 0.0,
            delta_range_weight: 0.0,
            pp_always: false,
            pp_hours: 3.0,
            pp_weight: 0.0,
            dura_weight: 0.0,
            smb_ratio: SmbRatioCfg::default(),
            smb_max_range_extension: 1.0,
            iob_threshold_percent: 100.0,
            even_on_odd_off: false,
            even_on_odd_off_always: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct B30Cfg {
    pub enabled: bool,
    /// Smallest manual bolus (U) that starts the boost window.
    pub start_bolus: f64,
    /// Eating-soon temp target (mg/dL) that must be active.
    pub target: f64,
    pub factor: f64,
    pub upper_bg: f64,
    pub upper_delta: f64,
    /// Window length in minutes.
    pub duration: f64,
}

impl Default for B30Cfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KetoCfg {
    pub enabled: bool,
    /// Variable policy: floor only while IOB and activity are negative.
    pub variable: bool,
    /// Floor as a fraction of the scheduled basal (0.05..=0.5 after scaling).
    pub basal_percent: f64,
    pub absolute: bool,
    pub basal_absolute: f64,
}

impl Default for KetoCfg {
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

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OverrideCfg {
    pub enabled: bool,
    pub percentage: f64,
    pub isf_and_cr: bool,
    pub isf: bool,
    pub cr: bool,
    /// Replacement target in mg/dL; 0 keeps the profile target.
    pub target: f64,
    pub smb_is_off: bool,
    pub smb_is_always_off: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub advanced: bool,
    pub smb_minutes: Option<f64>,
    pub uam_minutes: Option<f64>,
}

impl Default for OverrideCfg {
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

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CgmGuardStyle {
    /// Replace a high temp with the scheduled basal for 30 minutes.
    #[default]
    Neutral,
    /// Cancel a high temp outright.
    Cancel,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlatCgmRule {
    /// CGM readings stayed within a 2 mg/dL band for more than 89 minutes.
    #[default]
    Duration,
    /// BG above 60 with a zero delta and average deltas inside ±1 mg/dL.
    ZeroDelta,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct GuardsCfg {
    pub cgm_guard_style: CgmGuardStyle,
    pub flat_cgm_rule: FlatCgmRule,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub profile: ProfileCfg,
    #[serde(default)]
    pub targets: TargetsCfg,
    #[serde(default)]
    pub smb: SmbCfg,
    #[serde(default)]
    pub dynamic_isf: DynamicIsfCfg,
    #[serde(default)]
    pub autoisf: AutoIsfCfg,
    #[serde(default)]
    pub b30: B30Cfg,
    #[serde(default)]
    pub keto: KetoCfg,
    #[serde(default, rename = "override")]
    pub overrides: OverrideCfg,
    #[serde(default)]
    pub guards: GuardsCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeOfDayToml {
    Minutes(u32),
    Text(String),
}

fn parse_time_of_day(s: &str) -> Option<u32> {
    let mut parts = s.split(':');
    let h: u32 = parts.next()?.trim().parse().ok()?;
    let m: u32 = parts.next()?.trim().parse().ok()?;
    let sec: u32 = match parts.next() {
        Some(p) => p.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || h > 23 || m > 59 || sec > 59 {
        return None;
    }
    Some(h * 60 + m)
}

fn de_time_of_day<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match TimeOfDayToml::deserialize(deserializer)? {
        TimeOfDayToml::Minutes(m) if m < 24 * 60 => Ok(m),
        TimeOfDayToml::Minutes(m) => Err(serde::de::Error::custom(format!(
            "time of day {m} is past midnight"
        ))),
        TimeOfDayToml::Text(s) => parse_time_of_day(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day '{s}'"))),
    }
}

/// CSV row for one glucose reading.
///
/// Expected headers:
/// date,glucose,device,type
///
/// Example:
/// date,glucose,device,type
/// 2025-01-26T12:00:00+01:00,120,g6,sgv
/// 2025-01-26T11:55:00+01:00,118,g6,sgv
#[derive(Debug, Deserialize, Clone)]
pub struct ReadingRow {
    pub date: chrono::DateTime<chrono::FixedOffset>,
    pub glucose: Option<f64>,
    pub device: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl From<ReadingRow> for GlucoseReadingDto {
    fn from(r: ReadingRow) -> Self {
        Self {
            date: r.date,
            glucose: r.glucose,
            device: r.device,
            kind: r.kind,
            noise: None,
        }
    }
}

pub fn load_readings_csv(path: &std::path::Path) -> eyre::Result<Vec<GlucoseReadingDto>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open readings CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["date", "glucose", "device", "type"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "readings CSV must have headers 'date,glucose,device,type', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ReadingRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(GlucoseReadingDto::from(row)),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("readings CSV {:?} has no rows", path);
    }
    // Newest first, regardless of file order
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let p = &self.profile;

        // Profile
        if !(p.current_basal.is_finite() && p.current_basal >= 0.0) {
            eyre::bail!("profile.current_basal must be >= 0");
        }
        if !(p.max_basal.is_finite() && p.max_basal > 0.0) {
            eyre::bail!("profile.max_basal must be > 0");
        }
        if let Some(m) = p.max_daily_basal
            && !(m.is_finite() && m > 0.0)
        {
            eyre::bail!("profile.max_daily_basal must be > 0");
        }
        if p.max_iob < 0.0 {
            eyre::bail!("profile.max_iob must be >= 0");
        }
        if !(p.sens.is_finite() && p.sens > 0.0) {
            eyre::bail!("profile.sens must be > 0");
        }
        if !(p.carb_ratio.is_finite() && p.carb_ratio > 0.0) {
            eyre::bail!("profile.carb_ratio must be > 0");
        }
        if !(p.min_bg > 0.0 && p.max_bg > 0.0) {
            eyre::bail!("profile.min_bg and profile.max_bg must be > 0");
        }
        if p.min_bg > p.max_bg {
            eyre::bail!("profile.min_bg must be <= profile.max_bg");
        }
        if p.autosens_min <= 0.0 || p.autosens_max <= 0.0 {
            eyre::bail!("profile.autosens_min and profile.autosens_max must be > 0");
        }
        if !(p.bolus_increment > 0.0 && p.bolus_increment <= 1.0) {
            eyre::bail!("profile.bolus_increment must be in (0.0, 1.0]");
        }
        if p.max_daily_safety_multiplier <= 0.0 || p.current_basal_safety_multiplier <= 0.0 {
            eyre::bail!("profile safety multipliers must be > 0");
        }
        if !(0.0..=1.0).contains(&p.remaining_carbs_fraction) {
            eyre::bail!("profile.remaining_carbs_fraction must be in [0.0, 1.0]");
        }
        if p.remaining_carbs_cap < 0.0 {
            eyre::bail!("profile.remaining_carbs_cap must be >= 0");
        }
        if !p.max_carb_absorption_rate.is_finite() || p.max_carb_absorption_rate <= 0.0 {
            eyre::bail!("profile.max_carb_absorption_rate must be > 0");
        }
        if let Some(first) = p.basal_schedule.first()
            && first.start != 0
        {
            eyre::bail!("profile.basal_schedule must start at 00:00");
        }
        for w in p.basal_schedule.windows(2) {
            if w[1].start <= w[0].start {
                eyre::bail!("profile.basal_schedule entries must be in increasing start order");
            }
        }
        if p.basal_schedule.iter().any(|b| b.rate.is_nan() || b.rate < 0.0) {
            eyre::bail!("profile.basal_schedule rates must be >= 0");
        }
        if let Some(cr) = &p.carb_ratios
            && cr.schedule.is_empty()
        {
            eyre::bail!("profile.carb_ratios.schedule must not be empty");
        }

        // Targets
        if self.targets.half_basal_exercise_target <= 100.0 {
            eyre::bail!("targets.half_basal_exercise_target must be > 100");
        }
        if self.targets.noisy_cgm_target_multiplier < 1.0 {
            eyre::bail!("targets.noisy_cgm_target_multiplier must be >= 1.0");
        }

        // SMB
        if !(0.0..=1.0).contains(&self.smb.delivery_ratio) {
            eyre::bail!("smb.delivery_ratio must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.smb.threshold_ratio) {
            eyre::bail!("smb.threshold_ratio must be in [0.0, 1.0]");
        }
        if let Some(m) = self.smb.max_smb_basal_minutes
            && m <= 0.0
        {
            eyre::bail!("smb.max_smb_basal_minutes must be > 0");
        }
        if let Some(i) = self.smb.interval_minutes
            && i <= 0.0
        {
            eyre::bail!("smb.interval_minutes must be > 0");
        }
        if let Some(t) = self.smb.max_delta_bg_threshold
            && (t.is_nan() || t <= 0.0)
        {
            eyre::bail!("smb.max_delta_bg_threshold must be > 0");
        }

        // Dynamic ISF
        if self.dynamic_isf.adjustment_factor <= 0.0 {
            eyre::bail!("dynamic_isf.adjustment_factor must be > 0");
        }
        if !(0.0..=1.0).contains(&self.dynamic_isf.weight_percentage) {
            eyre::bail!("dynamic_isf.weight_percentage must be in [0.0, 1.0]");
        }
        if self.dynamic_isf.use_custom_peak_time
            && !(35.0..=120.0).contains(&self.dynamic_isf.insulin_peak_time)
        {
            eyre::bail!("dynamic_isf.insulin_peak_time must be in [35, 120]");
        }

        // autoISF
        if self.autoisf.min <= 0.0 || self.autoisf.max <= 0.0 {
            eyre::bail!("autoisf.min and autoisf.max must be > 0");
        }
        if self.autoisf.min > self.autoisf.max {
            eyre::bail!("autoisf.min must be <= autoisf.max");
        }
        if self.autoisf.smb_ratio.min > self.autoisf.smb_ratio.max {
            eyre::bail!("autoisf.smb_ratio.min must be <= autoisf.smb_ratio.max");
        }
        if self.autoisf.smb_max_range_extension < 1.0 {
            eyre::bail!("autoisf.smb_max_range_extension must be >= 1.0");
        }

        if self.autoisf.enabled && self.dynamic_isf.enabled {
            eyre::bail!("autoisf.enabled and dynamic_isf.enabled are mutually exclusive");
        }

        // B30
        if self.b30.enabled && self.b30.duration <= 0.0 {
            eyre::bail!("b30.duration must be > 0");
        }

        // Override
        if self.overrides.enabled && (self.overrides.percentage.is_nan() || self.overrides.percentage <= 0.0) {
            eyre::bail!("override.percentage must be > 0");
        }
        if self.overrides.start_hour > 23 || self.overrides.end_hour > 23 {
            eyre::bail!("override.start_hour and override.end_hour must be in [0, 23]");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_accepts_short_and_long_forms() {
        assert_eq!(parse_time_of_day("00:00"), Some(0));
        assert_eq!(parse_time_of_day("06:30:00"), Some(390));
        assert_eq!(parse_time_of_day("24:00"), None);
        assert_eq!(parse_time_of_day("6"), None);
    }
}
