//! The decision record handed to the pump-command layer.

use oref_traits::Timestamp;
use serde::{Serialize, Serializer};

use crate::autoisf::IsfRatios;
use crate::config::Units;
use crate::error::DecisionError;
use crate::predict::PredictedCurves;
use crate::reason::{ReasonEvent, ReasonTrail};
use crate::tdd::TddBreakdown;

fn serialize_error<S: Serializer>(err: &Option<DecisionError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

fn serialize_units<S: Serializer>(units: &Units, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(match units {
        Units::MgDl => "mg/dL",
        Units::MmolL => "mmol/L",
    })
}

/// One cycle's recommendation: an optional temp basal, an optional
/// micro-bolus and everything that explains them.
///
/// A `rate`/`duration` of `None` means "leave the running temp alone".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempBasalRequest {
    pub temp: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Micro-bolus to deliver now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<f64>,
    pub deliver_at: Timestamp,
    pub bg: f64,
    pub tick: String,
    #[serde(rename = "eventualBG", skip_serializing_if = "Option::is_none")]
    pub eventual_bg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin_req: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservoir: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity_ratio: Option<f64>,
    #[serde(rename = "CR", skip_serializing_if = "Option::is_none")]
    pub cr: Option<f64>,
    #[serde(rename = "ISF", skip_serializing_if = "Option::is_none")]
    pub isf: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isf_ratios: Option<IsfRatios>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smb_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin: Option<TddBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_target: Option<f64>,
    pub insulin_for_manual_bolus: f64,
    pub manual_bolus_error: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_delta: Option<f64>,
    #[serde(rename = "minGuardBG", skip_serializing_if = "Option::is_none")]
    pub min_guard_bg: Option<f64>,
    #[serde(rename = "minPredBG", skip_serializing_if = "Option::is_none")]
    pub min_pred_bg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(rename = "predBGs")]
    pub pred_bgs: PredictedCurves,
    #[serde(rename = "COB")]
    pub cob: f64,
    #[serde(rename = "IOB")]
    pub iob: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bolus_iob: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basal_iob: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iob_activity: Option<f64>,
    #[serde(rename = "BGI", skip_serializing_if = "Option::is_none")]
    pub bgi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deviation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs_req: Option<f64>,
    #[serde(rename = "displayUnits", serialize_with = "serialize_units")]
    pub units_label: Units,
    pub reason: ReasonTrail,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<DecisionError>,
}

impl TempBasalRequest {
    pub fn new(deliver_at: Timestamp, bg: f64, delta: f64, units: Units) -> Self {
        let tick = if delta > -0.5 {
            format!("+{}", crate::util::Num(crate::util::round0(delta)))
        } else {
            crate::util::Num(crate::util::round0(delta)).to_string()
        };
        Self {
            temp: "absolute",
            rate: None,
            duration: None,
            units: None,
            deliver_at,
            bg,
            tick,
            eventual_bg: None,
            insulin_req: None,
            reservoir: None,
            sensitivity_ratio: None,
            cr: None,
            isf: None,
            isf_ratios: None,
            smb_ratio: None,
            insulin: None,
            current_target: None,
            insulin_for_manual_bolus: 0.0,
            manual_bolus_error: 0,
            min_delta: None,
            expected_delta: None,
            min_guard_bg: None,
            min_pred_bg: None,
            threshold: None,
            pred_bgs: PredictedCurves::default(),
            cob: 0.0,
            iob: 0.0,
            bolus_iob: None,
            basal_iob: None,
            iob_activity: None,
            bgi: None,
            deviation: None,
            carbs_req: None,
            units_label: units,
            reason: ReasonTrail::new(units),
            error: None,
        }
    }

    /// Record that ends the cycle without any action.
    pub fn failed(mut self, err: DecisionError) -> Self {
        tracing::error!(error = %err, "decision aborted");
        self.error = Some(err);
        self
    }

    /// Apply a temp basal.
    pub fn set_temp(&mut self, rate: f64, duration: f64) {
        self.rate = Some(rate);
        self.duration = Some(duration);
    }

    pub fn push(&mut self, event: ReasonEvent) {
        self.reason.push(event);
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the record changes what the pump is doing.
    pub fn has_action(&self) -> bool {
        self.rate.is_some() || self.units.is_some_and(|u| u > 0.0)
    }
}
