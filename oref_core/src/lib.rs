#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::similar_names,
    clippy::must_use_candidate,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::suboptimal_flops
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Temp basal and micro-bolus decision core for a closed-loop insulin pump.
//!
//! Every five minutes the caller hands in a glucose trend, the IOB model
//! output, meal data and the pump's running temp; [`DecisionEngine::determine`]
//! answers with a [`TempBasalRequest`]. The clock, basal rounding and carb
//! ratio lookup are injected through `oref_traits`.
//!
//! ## Architecture
//!
//! - **Glucose**: trend, flat-CGM and parabola analysis of raw readings (`glucose`)
//! - **Sensitivity**: targets, autosens, temp-target ratio, dynamic ISF and autoISF
//!   (`sensitivity`, `dynamic_isf`, `autoisf`)
//! - **TDD**: total daily dose reconstruction from the pump log (`tdd`)
//! - **Prediction**: IOB / ZT / COB / UAM curves and their summary values (`predict`)
//! - **SMB**: enablement, gating status and micro-bolus sizing (`smb`, `status`)
//! - **Safety**: max safe basal, ketosis floor and the neutral-temp rule (`temp_basal`)
//! - **Decision**: staged pipeline and the decision record (`engine`, `decision`)
//! - **Reason**: typed reason events rendered on output (`reason`)
//!
//! ## Units
//!
//! Internals are mg/dL and U/hr throughout; mmol/L appears only when the reason
//! trail is rendered.

pub mod autoisf;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod decision;
pub mod dynamic_isf;
pub mod engine;
pub mod error;
pub mod glucose;
pub mod mocks;
pub mod predict;
pub mod reason;
pub mod rounding;
pub mod schedule;
pub mod sensitivity;
pub mod smb;
pub mod status;
pub mod tdd;
pub mod temp_basal;
pub mod types;
pub mod util;

pub use builder::{CycleInputsBuilder, EngineBuilder, Missing, ProfileDefault, Set};
pub use config::{Profile, Settings, Units};
pub use conversions::cycle_inputs;
pub use decision::TempBasalRequest;
pub use engine::{DecisionEngine, determine_basal};
pub use error::{BuildError, DecisionError, Result};
pub use glucose::analyze;
pub use reason::{ReasonEvent, ReasonTrail};
pub use rounding::PumpRounding;
pub use schedule::{BasalSchedule, CarbRatioSchedule};
pub use status::SmbStatus;
pub use tdd::{TddBreakdown, total_daily_dose};
pub use types::{
    CurrentTemp, CycleInputs, GlucoseReading, GlucoseStatus, IobData, IobTick, MealData, PumpEvent,
};
