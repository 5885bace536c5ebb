//! Type-state builders for [`CycleInputs`] and [`DecisionEngine`].
//!
//! `CycleInputsBuilder` enforces at compile time that glucose and IOB are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;

use oref_traits::{BasalRounder, CarbRatioLookup, Timestamp};

use crate::config::{Profile, Settings};
use crate::engine::DecisionEngine;
use crate::error::{BuildError, Result};
use crate::rounding::PumpRounding;
use crate::schedule::CarbRatioSchedule;
use crate::types::{CurrentTemp, CycleInputs, GlucoseStatus, IobData, MealData, PumpEvent, TddAverages};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

// ── CycleInputs ──────────────────────────────────────────────────────────────

impl CycleInputs {
    /// Start building the inputs of the cycle running at `now`.
    pub fn builder(now: Timestamp) -> CycleInputsBuilder<Missing, Missing> {
        CycleInputsBuilder {
            now,
            glucose: None,
            iob: None,
            meal: MealData::default(),
            current_temp: CurrentTemp::default(),
            pump_history: Vec::new(),
            autosens_ratio: 1.0,
            micro_bolus_allowed: false,
            reservoir: None,
            tdd_averages: None,
            _g: PhantomData,
            _i: PhantomData,
        }
    }
}

pub struct CycleInputsBuilder<G, I> {
    now: Timestamp,
    glucose: Option<GlucoseStatus>,
    iob: Option<IobData>,
    meal: MealData,
    current_temp: CurrentTemp,
    pump_history: Vec<PumpEvent>,
    autosens_ratio: f64,
    micro_bolus_allowed: bool,
    reservoir: Option<f64>,
    tdd_averages: Option<TddAverages>,
    _g: PhantomData<G>,
    _i: PhantomData<I>,
}

impl<G, I> CycleInputsBuilder<G, I> {
    fn retag<G2, I2>(self) -> CycleInputsBuilder<G2, I2> {
        CycleInputsBuilder {
            now: self.now,
            glucose: self.glucose,
            iob: self.iob,
            meal: self.meal,
            current_temp: self.current_temp,
            pump_history: self.pump_history,
            autosens_ratio: self.autosens_ratio,
            micro_bolus_allowed: self.micro_bolus_allowed,
            reservoir: self.reservoir,
            tdd_averages: self.tdd_averages,
            _g: PhantomData,
            _i: PhantomData,
        }
    }

    pub fn glucose(mut self, status: GlucoseStatus) -> CycleInputsBuilder<Set, I> {
        self.glucose = Some(status);
        self.retag()
    }

    pub fn iob(mut self, iob: IobData) -> CycleInputsBuilder<G, Set> {
        self.iob = Some(iob);
        self.retag()
    }

    pub fn meal(mut self, meal: MealData) -> Self {
        self.meal = meal;
        self
    }

    pub fn current_temp(mut self, temp: CurrentTemp) -> Self {
        self.current_temp = temp;
        self
    }

    /// Pump log, newest first.
    pub fn pump_history(mut self, history: Vec<PumpEvent>) -> Self {
        self.pump_history = history;
        self
    }

    pub fn autosens_ratio(mut self, ratio: f64) -> Self {
        self.autosens_ratio = ratio;
        self
    }

    pub fn micro_bolus_allowed(mut self, allowed: bool) -> Self {
        self.micro_bolus_allowed = allowed;
        self
    }

    pub fn reservoir(mut self, units: f64) -> Self {
        self.reservoir = Some(units);
        self
    }

    pub fn tdd_averages(mut self, averages: TddAverages) -> Self {
        self.tdd_averages = Some(averages);
        self
    }

    /// Fallible build usable in any state.
    pub fn try_build(self) -> Result<CycleInputs> {
        let glucose = self
            .glucose
            .ok_or_else(|| eyre::Report::new(BuildError::MissingGlucose))?;
        let iob = self.iob.ok_or_else(|| eyre::Report::new(BuildError::MissingIob))?;
        if !(self.autosens_ratio.is_finite() && self.autosens_ratio > 0.0) {
            return Err(eyre::Report::new(BuildError::InvalidInput(
                "autosens ratio must be > 0",
            )));
        }
        Ok(CycleInputs {
            now: self.now,
            glucose,
            iob,
            meal: self.meal,
            current_temp: self.current_temp,
            pump_history: self.pump_history,
            autosens_ratio: self.autosens_ratio,
            micro_bolus_allowed: self.micro_bolus_allowed,
            reservoir: self.reservoir,
            tdd_averages: self.tdd_averages,
        })
    }
}

impl CycleInputsBuilder<Set, Set> {
    pub fn build(self) -> Result<CycleInputs> {
        self.try_build()
    }
}

// ── DecisionEngine ───────────────────────────────────────────────────────────

/// Collaborator that can be derived from the profile alone.
pub trait ProfileDefault {
    fn from_profile(profile: &Profile) -> Self;
}

impl ProfileDefault for PumpRounding {
    fn from_profile(profile: &Profile) -> Self {
        Self::new(profile.model.clone())
    }
}

impl ProfileDefault for CarbRatioSchedule {
    fn from_profile(profile: &Profile) -> Self {
        profile.carb_ratios.clone()
    }
}

impl DecisionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            settings: None,
            rounder: None,
            carb_ratios: None,
        }
    }
}

/// Builder for [`DecisionEngine`]; collaborators default from the profile.
pub struct EngineBuilder<R = PumpRounding, C = CarbRatioSchedule> {
    settings: Option<Settings>,
    rounder: Option<R>,
    carb_ratios: Option<C>,
}

impl<R, C> EngineBuilder<R, C> {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn rounder<R2: BasalRounder>(self, rounder: R2) -> EngineBuilder<R2, C> {
        EngineBuilder {
            settings: self.settings,
            rounder: Some(rounder),
            carb_ratios: self.carb_ratios,
        }
    }

    pub fn carb_ratios<C2: CarbRatioLookup>(self, lookup: C2) -> EngineBuilder<R, C2> {
        EngineBuilder {
            settings: self.settings,
            rounder: self.rounder,
            carb_ratios: Some(lookup),
        }
    }
}

impl<R, C> EngineBuilder<R, C>
where
    R: BasalRounder + ProfileDefault,
    C: CarbRatioLookup + ProfileDefault,
{
    pub fn try_build(self) -> Result<DecisionEngine<R, C>> {
        let settings = self
            .settings
            .ok_or_else(|| eyre::Report::new(BuildError::MissingProfile))?;
        validate(&settings)?;
        let rounder = self
            .rounder
            .unwrap_or_else(|| R::from_profile(&settings.profile));
        let carb_ratios = self
            .carb_ratios
            .unwrap_or_else(|| C::from_profile(&settings.profile));
        Ok(DecisionEngine {
            settings,
            rounder,
            carb_ratios,
        })
    }
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.autoisf.enabled && settings.dynamic_isf.enabled {
        return Err(eyre::Report::new(BuildError::InvalidInput(
            "autoISF and dynamic ISF are mutually exclusive",
        )));
    }
    let p = &settings.profile;
    if !(p.autosens_min > 0.0 && p.autosens_min <= p.autosens_max) {
        return Err(eyre::Report::new(BuildError::InvalidInput(
            "autosens limits must satisfy 0 < min <= max",
        )));
    }
    if p.max_iob < 0.0 {
        return Err(eyre::Report::new(BuildError::InvalidInput("max_iob must be >= 0")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn now() -> Timestamp {
        DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap()
    }

    #[test]
    fn try_build_reports_missing_glucose() {
        let err = CycleInputs::builder(now())
            .iob(IobData::flat(0.0, 0.0, 48))
            .try_build()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::MissingGlucose)));
    }

    #[test]
    fn build_carries_optional_inputs() {
        let inputs = CycleInputs::builder(now())
            .glucose(GlucoseStatus::flat(now(), 120.0))
            .iob(IobData::flat(0.5, 0.01, 48))
            .reservoir(120.0)
            .micro_bolus_allowed(true)
            .build()
            .unwrap();
        assert_eq!(inputs.reservoir, Some(120.0));
        assert!(inputs.micro_bolus_allowed);
        assert_eq!(inputs.autosens_ratio, 1.0);
    }

    #[test]
    fn rejects_non_positive_autosens() {
        let err = CycleInputs::builder(now())
            .glucose(GlucoseStatus::flat(now(), 120.0))
            .iob(IobData::flat(0.0, 0.0, 48))
            .autosens_ratio(0.0)
            .build()
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::InvalidInput(_))));
    }

    #[test]
    fn engine_needs_settings() {
        let err = DecisionEngine::builder().try_build().err().unwrap();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::MissingProfile)));
    }

    #[test]
    fn engine_rejects_both_isf_strategies() {
        let mut settings = Settings::default();
        settings.autoisf.enabled = true;
        settings.dynamic_isf.enabled = true;
        let err = DecisionEngine::builder().settings(settings).try_build().err().unwrap();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::InvalidInput(_))));
    }
}
