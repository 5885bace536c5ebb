//! Plain data carried through one decision cycle.

use oref_traits::Timestamp;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingKind {
    #[default]
    Sgv,
    Calibration,
}

/// One CGM sample as supplied by the data source, newest first in a window.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseReading {
    pub date: Timestamp,
    pub glucose: Option<f64>,
    pub device: Option<String>,
    pub kind: ReadingKind,
    pub noise: Option<f64>,
}

impl GlucoseReading {
    pub fn sgv(date: Timestamp, glucose: f64) -> Self {
        Self {
            date,
            glucose: Some(glucose),
            device: None,
            kind: ReadingKind::Sgv,
            noise: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}

/// Best-fit local parabola over the trailing glucose window.
///
/// Coefficients are in mg/dL against time scaled to 5-minute units with the
/// newest reading at t = 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ParabolaFit {
    pub duration_minutes: f64,
    pub last_delta: f64,
    pub next_delta: f64,
    /// R² of the fit, in [0, 1].
    pub correlation: f64,
    pub acceleration: f64,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Snapshot of the current glucose trend.
///
/// All deltas are mg/dL per 5 minutes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlucoseStatus {
    pub glucose: f64,
    pub delta: f64,
    pub short_avg_delta: f64,
    pub long_avg_delta: f64,
    pub avg_delta: f64,
    pub noise: f64,
    pub cgm_flat_minutes: f64,
    /// Minutes the readings stayed inside a ±5% band around their average.
    pub dura_isf_minutes: f64,
    pub dura_isf_average: f64,
    pub fit: ParabolaFit,
    pub date: Timestamp,
    /// Position of the latest calibration record in the window, if any.
    pub last_calibration_age: Option<usize>,
    pub device: Option<String>,
}

impl GlucoseStatus {
    /// Status for a single flat reading; handy for fixtures.
    pub fn flat(date: Timestamp, glucose: f64) -> Self {
        Self {
            glucose,
            delta: 0.0,
            short_avg_delta: 0.0,
            long_avg_delta: 0.0,
            avg_delta: 0.0,
            noise: 0.0,
            cgm_flat_minutes: 0.0,
            dura_isf_minutes: 0.0,
            dura_isf_average: glucose,
            fit: ParabolaFit::default(),
            date,
            last_calibration_age: None,
            device: None,
        }
    }

    pub fn with_deltas(mut self, delta: f64, short_avg: f64, long_avg: f64) -> Self {
        self.delta = delta;
        self.short_avg_delta = short_avg;
        self.long_avg_delta = long_avg;
        self.avg_delta = delta;
        self
    }
}

/// One 5-minute step of the external IOB model. Fields stay optional so a
/// gap in the model output is reported instead of silently zeroed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IobTick {
    pub iob: Option<f64>,
    pub activity: Option<f64>,
    pub zero_temp_activity: Option<f64>,
}

impl IobTick {
    pub fn new(iob: f64, activity: f64, zero_temp_activity: f64) -> Self {
        Self {
            iob: Some(iob),
            activity: Some(activity),
            zero_temp_activity: Some(zero_temp_activity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastTemp {
    pub date: Timestamp,
    pub rate: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IobData {
    pub ticks: Vec<IobTick>,
    pub last_temp: Option<LastTemp>,
    pub last_bolus_time: Option<Timestamp>,
    pub bolus_iob: Option<f64>,
    pub basal_iob: Option<f64>,
}

impl IobData {
    /// A constant IOB curve of `n` ticks.
    pub fn flat(iob: f64, activity: f64, n: usize) -> Self {
        Self {
            ticks: vec![IobTick::new(iob, activity, activity); n],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MealData {
    pub carbs: f64,
    pub meal_cob: f64,
    pub last_carb_time: Option<Timestamp>,
    pub bw_found: bool,
    pub bw_carbs: f64,
    pub slope_from_max_deviation: f64,
    pub slope_from_min_deviation: f64,
}

/// Temp basal the pump reports as running right now.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurrentTemp {
    pub rate: f64,
    /// Minutes left.
    pub duration: f64,
}

/// Pump log entry used for TDD reconstruction, newest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpEvent {
    Bolus { at: Timestamp, amount: f64 },
    TempBasal { at: Timestamp, rate: f64 },
    TempBasalDuration { at: Timestamp, minutes: f64 },
    PumpSuspend { at: Timestamp },
    PumpResume { at: Timestamp },
    Rewind { at: Timestamp },
    Prime { at: Timestamp },
    Other,
}

impl PumpEvent {
    pub fn at(&self) -> Option<Timestamp> {
        match *self {
            Self::Bolus { at, .. }
            | Self::TempBasal { at, .. }
            | Self::TempBasalDuration { at, .. }
            | Self::PumpSuspend { at }
            | Self::PumpResume { at }
            | Self::Rewind { at }
            | Self::Prime { at } => Some(at),
            Self::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TddAverages {
    pub weighted_average: f64,
    pub average_total: f64,
}

/// Everything the engine reads for one cycle.
#[derive(Debug, Clone)]
pub struct CycleInputs {
    pub now: Timestamp,
    pub glucose: GlucoseStatus,
    pub iob: IobData,
    pub meal: MealData,
    pub current_temp: CurrentTemp,
    pub pump_history: Vec<PumpEvent>,
    pub autosens_ratio: f64,
    pub micro_bolus_allowed: bool,
    pub reservoir: Option<f64>,
    pub tdd_averages: Option<TddAverages>,
}
