//! JSON schemas for the per-cycle inputs handed to the decision core.
//!
//! Field names follow the pump/CGM integration layer. Numeric fields that the
//! core requires are still `Option` here so a missing value reaches the core
//! and is reported in the decision record rather than failing the parse.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

pub type Timestamp = DateTime<FixedOffset>;

/// One CGM reading or calibration record. `sgv` is accepted for `glucose`.
#[derive(Debug, Deserialize, Clone)]
pub struct GlucoseReadingDto {
    #[serde(alias = "dateString")]
    pub date: Timestamp,
    #[serde(default, alias = "sgv")]
    pub glucose: Option<f64>,
    #[serde(default)]
    pub device: Option<String>,
    /// "sgv" (default) or "cal".
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub noise: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct IobTickDto {
    #[serde(default)]
    pub iob: Option<f64>,
    #[serde(default)]
    pub activity: Option<f64>,
    /// Activity of the same tick assuming a zero temp from now on.
    #[serde(default, alias = "iobWithZeroTempActivity")]
    pub zero_temp_activity: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LastTempDto {
    pub date: Timestamp,
    pub rate: f64,
    /// Minutes.
    pub duration: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IobInput {
    #[serde(default)]
    pub ticks: Vec<IobTickDto>,
    #[serde(default)]
    pub last_temp: Option<LastTempDto>,
    #[serde(default)]
    pub last_bolus_time: Option<Timestamp>,
    #[serde(default)]
    pub bolus_iob: Option<f64>,
    #[serde(default)]
    pub basal_iob: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MealInput {
    pub carbs: f64,
    #[serde(alias = "mealCOB")]
    pub meal_cob: f64,
    pub last_carb_time: Option<Timestamp>,
    #[serde(alias = "bwFound")]
    pub bw_found: bool,
    #[serde(alias = "bwCarbs")]
    pub bw_carbs: f64,
    #[serde(alias = "slopeFromMaxDeviation")]
    pub slope_from_max_deviation: f64,
    #[serde(alias = "slopeFromMinDeviation")]
    pub slope_from_min_deviation: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct CurrentTempInput {
    pub rate: f64,
    /// Minutes left.
    pub duration: f64,
}

/// Pump log entry, tagged by `_type` as the pump layer writes it.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "_type")]
pub enum PumpEventDto {
    Bolus {
        timestamp: Timestamp,
        amount: f64,
    },
    TempBasal {
        timestamp: Timestamp,
        rate: f64,
    },
    TempBasalDuration {
        timestamp: Timestamp,
        #[serde(rename = "duration (min)", alias = "duration")]
        duration: f64,
    },
    PumpSuspend {
        timestamp: Timestamp,
    },
    PumpResume {
        timestamp: Timestamp,
    },
    Rewind {
        timestamp: Timestamp,
    },
    Prime {
        timestamp: Timestamp,
    },
    /// Any event type the TDD reconstruction does not look at.
    #[serde(other)]
    Other,
}

/// Long-term TDD statistics kept by the surrounding application.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct TddAveragesInput {
    pub weighted_average: f64,
    /// Average over all stored days (up to 14).
    pub average_total: f64,
}

fn default_ratio() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct CycleInput {
    /// Current time for this cycle; the system clock is used when absent.
    #[serde(default)]
    pub now: Option<Timestamp>,
    pub glucose: Vec<GlucoseReadingDto>,
    pub iob: IobInput,
    #[serde(default)]
    pub meal: MealInput,
    #[serde(default)]
    pub current_temp: CurrentTempInput,
    #[serde(default)]
    pub pump_history: Vec<PumpEventDto>,
    #[serde(default = "default_ratio")]
    pub autosens_ratio: f64,
    #[serde(default)]
    pub micro_bolus_allowed: bool,
    #[serde(default)]
    pub reservoir: Option<f64>,
    #[serde(default)]
    pub tdd_averages: Option<TddAveragesInput>,
}

pub fn load_cycle_input_json(s: &str) -> eyre::Result<CycleInput> {
    serde_json::from_str::<CycleInput>(s).map_err(|e| eyre::eyre!("parse cycle input JSON: {e}"))
}

pub fn load_readings_json(s: &str) -> eyre::Result<Vec<GlucoseReadingDto>> {
    let mut rows: Vec<GlucoseReadingDto> =
        serde_json::from_str(s).map_err(|e| eyre::eyre!("parse readings JSON: {e}"))?;
    if rows.is_empty() {
        eyre::bail!("readings JSON has no entries");
    }
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(rows)
}

pub fn load_pump_history_json(s: &str) -> eyre::Result<Vec<PumpEventDto>> {
    serde_json::from_str(s).map_err(|e| eyre::eyre!("parse pump history JSON: {e}"))
}
