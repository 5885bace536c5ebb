//! Structured reason trail attached to every decision record.
//!
//! Stages push typed [`ReasonEvent`]s carrying numeric payloads; text is
//! produced only when the trail is rendered. Glucose payloads are stored in
//! mg/dL and converted to the profile's display units at render time.

use core::fmt::{self, Write as _};

use serde::{Serialize, Serializer};

use crate::config::Units;
use crate::status::SmbStatus;
use crate::util::{MMOL_PER_MGDL, Num, round_to, round0};

/// Display form of a glucose value in `units`.
#[inline]
pub fn convert_bg(value: f64, units: Units) -> f64 {
    match units {
        Units::MgDl => round0(value),
        Units::MmolL => round_to(value * MMOL_PER_MGDL, 1),
    }
}

/// What the parabola fit says about the turning point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitNote {
    PredictsMax { value: f64, minutes: f64 },
    PredictsMin { value: f64, minutes: f64 },
    BrakeBelowTarget { weight: f64 },
    SawMax { value: f64, minutes: f64 },
    SawMin { value: f64, minutes: f64 },
    LowCorrelation { correlation: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsfLimit {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTrip {
    Noisy,
    Stale,
    JustCalibrated,
    Flat,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReasonEvent {
    // ── Cycle header ─────────────────────────────────────────────────────────
    B30Running { rate: f64, minutes: f64 },
    SmbDeliveryRatio(f64),
    Autosens(f64),
    TempTargetRatio(f64),
    AutoIsfDisabled,
    AutoIsfDisabledExercise,
    SmbGate(SmbStatus),
    ParabolicFit { note: Option<FitNote>, acce_ratio: Option<f64> },
    AutoIsfMarker,
    BgIsfRatio { ratio: f64, accelerating: Option<bool> },
    PpIsfRatio(f64),
    DeltaIsfRatio(f64),
    DuraIsfRatio { minutes: f64, average: f64, ratio: f64 },
    FinalIsf { ratio: f64, exercise: bool, limit: Option<IsfLimit>, from: f64, to: f64 },
    AutoIsfNotModified,
    FloatingCarbs { cid: f64, carbs: f64, cob_cid: f64, cob: f64 },
    DynamicIsf { sigmoid: bool, dynamic_cr: bool, adjustment_factor: f64, ratio: f64 },
    DynamicIsfOff(&'static str),
    BasalRatio(f64),
    Summary {
        cob: f64,
        deviation: f64,
        bgi: f64,
        isf: f64,
        cr: f64,
        target: f64,
        min_pred_bg: f64,
        min_guard_bg: f64,
        iob_pred_bg: f64,
        cob_pred_bg: Option<f64>,
        uam_pred_bg: Option<f64>,
    },
    Tdd { total: f64, bolus_percent: f64, basal_percent: f64 },
    TddInsufficient,
    EndOfHeader,

    // ── CGM guard ────────────────────────────────────────────────────────────
    CgmGuard { trip: GuardTrip, minutes_ago: f64, now: String, bg_time: String, flat_minutes: f64, bg: f64, delta: f64, short: f64, long: f64 },
    GuardReplaceHighTemp { rate: f64, basal: f64 },
    GuardCancelHighTemp { rate: f64 },
    GuardShortenZeroTemp { minutes: f64 },
    GuardNothing { rate: f64, basal: f64 },

    // ── Stale temp ───────────────────────────────────────────────────────────
    TempRateMismatch { current: f64, last: f64 },
    LastTempEnded { minutes: f64 },

    // ── SMB disables and advisories ──────────────────────────────────────────
    MaxDeltaDisablesSmb { max_delta: f64, percent: f64, bg: f64 },
    CarbsRequired { carbs: f64, minutes: f64 },

    // ── Decision branches ────────────────────────────────────────────────────
    B30Forced { rate: f64, minutes: f64 },
    LgsException { iob: f64, limit: f64, min_delta: f64, expected_delta: f64 },
    Lgs { min_guard_bg: f64, threshold: f64 },
    TopOfHourCancel { minutes: u32 },
    EventualBelowMin { eventual_bg: f64, min_bg: f64 },
    NaiveBelow40,
    DeltaAboveExpected { delta: f64, expected_delta: f64 },
    MinDeltaAboveExpected { min_delta: f64, expected_delta: f64 },
    TempMatchesBasal { rate: f64, basal: f64 },
    SettingCurrentBasal { basal: f64 },
    RunningTempShortfall { minutes: f64, rate: f64 },
    TempAtLeastRequired { rate: f64, required: f64 },
    SettingZeroTemp { minutes: f64 },
    SettingRate { rate: f64 },
    FallingFaster { eventual_bg: f64, min_bg: f64, delta: f64, expected_delta: f64, use_min_delta: bool },
    InRange { eventual_bg: f64, min_pred_bg: f64 },
    EventualAboveMax { eventual_bg: f64, max_bg: f64 },
    IobAboveMax { iob: f64, max_iob: f64 },
    CappedByMaxIob { max_iob: f64 },
    InsulinRequired(f64),
    SmbInsulinReq(f64),
    SmbMaxBolus(f64),
    SmbLowTemp { minutes: f64, rate: f64 },
    Period,
    Microbolus { units: f64, iob_th_capped: bool },
    WaitingToMicrobolus { minutes: f64, seconds: f64 },
    AdjustedToMaxSafe { rate: f64, max_safe: f64 },
    RunningTempAboveNeed { minutes: f64, rate: f64, new_rate: f64 },
    NoTempSetting { rate: f64 },
    TempAtOrAboveRequired { rate: f64, required: f64 },
    TempBelowRequired { rate: f64, required: f64 },

    // ── Temp basal setter ────────────────────────────────────────────────────
    Sentence,
    RateLimitedByMaxSafe { rate: f64, max_safe: f64 },
    KetoVariable { cutoff: f64 },
    KetoVariableInactive { iob: f64, basal: f64, activity: f64 },
    KetoContinuous { cutoff: f64 },
    NoChangeNecessary { minutes: f64, rate: f64, suggested: f64 },
    NeutralCancel,
    NeutralNoTemp,
    NeutralSetting { basal: f64 },
}

fn w_bg(out: &mut String, v: f64, units: Units) {
    let _ = write!(out, "{}", Num(convert_bg(v, units)));
}

impl ReasonEvent {
    #[allow(clippy::too_many_lines)]
    fn render(&self, units: Units, out: &mut String) {
        let bg = |v: f64| Num(convert_bg(v, units));
        let n = Num;
        let _ = match self {
            Self::B30Running { rate, minutes } => {
                write!(out, "AIMI B30, Temp {}U/hr for {}m, ", n(*rate), n(*minutes))
            }
            Self::SmbDeliveryRatio(r) => write!(out, "SMB Del.Ratio:, {}", n(round_to(*r, 2))),
            Self::Autosens(r) => write!(out, ", autosens:, {}", n(round_to(*r, 2))),
            Self::TempTargetRatio(r) => write!(out, ", Ratio TT: {}", n(*r)),
            Self::AutoIsfDisabled => out.write_str(", autoISF disabled"),
            Self::AutoIsfDisabledExercise => out.write_str(", autoISF disabled (exercise)"),
            Self::SmbGate(status) => match status {
                SmbStatus::AimiB30 => out.write_str(", autoISF-SMB disabled:, B30 running"),
                SmbStatus::Blocked => out.write_str(", autoISF-SMB disabled:, odd Target"),
                SmbStatus::IobTh => out.write_str(", autoISF-SMB disabled:, iobTH exceeded"),
                SmbStatus::FullLoop => out.write_str(", autoISF-SMB enabled:, even TT"),
                SmbStatus::Enforced => out.write_str(", autoISF-SMB enabled:, even Target"),
                SmbStatus::Oref => Ok(()),
            },
            Self::ParabolicFit { note, acce_ratio } => {
                out.push_str(", Parabolic Fit:, ");
                if let Some(note) = note {
                    render_fit(*note, units, out);
                }
                match acce_ratio {
                    Some(r) => write!(out, ", acce-ISF Ratio:, {}", n(round_to(*r, 2))),
                    None => Ok(()),
                }
            }
            Self::AutoIsfMarker => out.write_str(", autoISF"),
            Self::BgIsfRatio {
                ratio,
                accelerating,
            } => {
                let tag = match accelerating {
                    Some(true) => "(accel.)",
                    Some(false) => "(minimal)",
                    None => "",
                };
                write!(out, ", bg-ISF Ratio: {}{tag}", n(round_to(*ratio, 2)))
            }
            Self::PpIsfRatio(r) => write!(out, ", pp-ISF Ratio: {}", n(round_to(*r, 2))),
            Self::DeltaIsfRatio(r) => write!(out, ", \u{394}-ISF Ratio: {}", n(round_to(*r, 2))),
            Self::DuraIsfRatio {
                minutes,
                average,
                ratio,
            } => write!(
                out,
                ", Duration: {}, Avg: {}, dura-ISF Ratio: {}",
                n(*minutes),
                bg(*average),
                n(round_to(*ratio, 2))
            ),
            Self::FinalIsf {
                ratio,
                exercise,
                limit,
                from,
                to,
            } => {
                let _ = write!(out, ", final Ratio: {}", n(round_to(*ratio, 2)));
                if *exercise {
                    out.push_str(" (exerciseMode)");
                }
                match limit {
                    Some(IsfLimit::Min) => out.push_str(" (lmtd.min)"),
                    Some(IsfLimit::Max) => out.push_str(" (lmtd.max)"),
                    None => {}
                }
                write!(out, ", final ISF: {}\u{2192}{}", bg(*from), bg(*to))
            }
            Self::AutoIsfNotModified => out.write_str(", not modified"),
            Self::FloatingCarbs {
                cid,
                carbs,
                cob_cid,
                cob,
            } => write!(
                out,
                ", Floating Carbs:, CID: {}, MealCarbs: {}, Not Floating:, CID: {}, MealCOB: {}",
                n(round_to(*cid, 1)),
                n(round_to(*carbs, 1)),
                n(round_to(*cob_cid, 1)),
                n(round_to(*cob, 1))
            ),
            Self::DynamicIsf {
                sigmoid,
                dynamic_cr,
                adjustment_factor,
                ratio,
            } => write!(
                out,
                ", Dynamic ISF/CR: On/{}, {}, AF: {}, Ratio: {}",
                if *dynamic_cr { "On" } else { "Off" },
                if *sigmoid { "Sigmoid function" } else { "Logarithmic formula" },
                n(*adjustment_factor),
                n(round_to(*ratio, 2))
            ),
            Self::DynamicIsfOff(why) => write!(out, ", Dynamic ISF: Off ({why})"),
            Self::BasalRatio(r) => write!(out, ", Basal ratio: {}", n(*r)),
            Self::Summary {
                cob,
                deviation,
                bgi,
                isf,
                cr,
                target,
                min_pred_bg,
                min_guard_bg,
                iob_pred_bg,
                cob_pred_bg,
                uam_pred_bg,
            } => {
                let _ = write!(
                    out,
                    ", Standard, COB: {}, Dev: {}, BGI: {}, ISF: {}, CR: {}, Target: {}, minPredBG {}, minGuardBG {}, IOBpredBG {}",
                    n(*cob),
                    bg(*deviation),
                    bg(*bgi),
                    bg(*isf),
                    n(*cr),
                    bg(*target),
                    bg(*min_pred_bg),
                    bg(*min_guard_bg),
                    bg(*iob_pred_bg)
                );
                if let Some(v) = cob_pred_bg {
                    out.push_str(", COBpredBG ");
                    w_bg(out, *v, units);
                }
                if let Some(v) = uam_pred_bg {
                    out.push_str(", UAMpredBG ");
                    w_bg(out, *v, units);
                }
                Ok(())
            }
            Self::Tdd {
                total,
                bolus_percent,
                basal_percent,
            } => write!(
                out,
                ", TDD: {} U, {}% Bolus {}% Basal",
                n(round_to(*total, 2)),
                n(*bolus_percent),
                n(*basal_percent)
            ),
            Self::TddInsufficient => out.write_str(", TDD: Not enough pumpData (< 21h)"),
            Self::EndOfHeader => out.write_str("; "),

            Self::CgmGuard {
                trip,
                minutes_ago,
                now,
                bg_time,
                flat_minutes,
                bg: glucose,
                delta,
                short,
                long,
            } => match trip {
                GuardTrip::Noisy => out.write_str("CGM is calibrating, in ??? state, or noise is high"),
                GuardTrip::Stale => write!(
                    out,
                    "If current system time {now} is correct, then BG data is too old. The last BG data was read {}m ago at {bg_time}",
                    n(*minutes_ago)
                ),
                GuardTrip::JustCalibrated => out.write_str("CGM was just calibrated"),
                GuardTrip::Flat => write!(
                    out,
                    "Error: CGM data was suspiciously flat for the past ~{}m",
                    n(round_to(*flat_minutes, 1))
                ),
                GuardTrip::Unchanged => write!(
                    out,
                    "CGM data is unchanged ({}+{}) for 5m w/ {} mg/dL ~15m change & {} mg/dL ~45m change",
                    bg(*glucose),
                    bg(*delta),
                    bg(*short),
                    bg(*long)
                ),
            },
            Self::GuardReplaceHighTemp { rate, basal } => write!(
                out,
                ". Replacing high temp basal of {} with neutral temp of {}",
                n(*rate),
                n(*basal)
            ),
            Self::GuardCancelHighTemp { rate } => {
                write!(out, ". Canceling high temp basal of {}", n(*rate))
            }
            Self::GuardShortenZeroTemp { minutes } => {
                write!(out, ". Shortening {}m long zero temp to 30m. ", n(*minutes))
            }
            Self::GuardNothing { rate, basal } => write!(
                out,
                ". Temp {} <= current basal {}U/hr; doing nothing. ",
                n(*rate),
                n(*basal)
            ),

            Self::TempRateMismatch { current, last } => write!(
                out,
                "Warning: currenttemp rate {} != lastTemp rate {} from pumphistory; canceling temp",
                n(*current),
                n(*last)
            ),
            Self::LastTempEnded { minutes } => write!(
                out,
                "Warning: currenttemp running but lastTemp from pumphistory ended {}m ago; canceling temp",
                n(round_to(*minutes, 2))
            ),

            Self::MaxDeltaDisablesSmb {
                max_delta,
                percent,
                bg: glucose,
            } => write!(
                out,
                "maxDelta {} > {}% of BG {} - SMB disabled!, ",
                bg(*max_delta),
                n(100.0 * percent),
                bg(*glucose)
            ),
            Self::CarbsRequired { carbs, minutes } => write!(
                out,
                "{} add'l carbs req w/in {}m; ",
                n(*carbs),
                n(*minutes)
            ),

            Self::B30Forced { rate, minutes } => write!(
                out,
                "setting AIMI B30 Temp {}U/hr for {}m ",
                n(*rate),
                n(*minutes)
            ),
            Self::LgsException {
                iob,
                limit,
                min_delta,
                expected_delta,
            } => write!(
                out,
                "IOB {} < {} and minDelta {} > expectedDelta {}; ",
                n(*iob),
                n(round_to(*limit, 2)),
                bg(*min_delta),
                bg(*expected_delta)
            ),
            Self::Lgs {
                min_guard_bg,
                threshold,
            } => write!(out, "minGuardBG {}<{}", bg(*min_guard_bg), bg(*threshold)),
            Self::TopOfHourCancel { minutes } => write!(
                out,
                "; Canceling temp at {minutes}min before turn of the hour to avoid beeping of MDT. SMB disabled anyways."
            ),
            Self::EventualBelowMin {
                eventual_bg,
                min_bg,
            } => write!(out, "Eventual BG {} < {}", bg(*eventual_bg), bg(*min_bg)),
            Self::NaiveBelow40 => out.write_str(", naive_eventualBG < 40. "),
            Self::DeltaAboveExpected {
                delta,
                expected_delta,
            } => write!(
                out,
                ", but Delta {} > expectedDelta {}",
                bg(*delta),
                bg(*expected_delta)
            ),
            Self::MinDeltaAboveExpected {
                min_delta,
                expected_delta,
            } => write!(
                out,
                ", but Min. Delta {:.2} > Exp. Delta {}",
                min_delta,
                bg(*expected_delta)
            ),
            Self::TempMatchesBasal { rate, basal } => {
                write!(out, ", temp {} ~ req {}U/hr. ", n(*rate), n(*basal))
            }
            Self::SettingCurrentBasal { basal } => {
                write!(out, "; setting current basal of {} as temp. ", n(*basal))
            }
            Self::RunningTempShortfall { minutes, rate } => write!(
                out,
                ", {}m@{:.2} is a lot less than needed. ",
                n(*minutes),
                rate
            ),
            Self::TempAtLeastRequired { rate, required } => write!(
                out,
                ", temp {} ~< req {}U/hr. ",
                n(*rate),
                n(round_to(*required, 2))
            ),
            Self::SettingZeroTemp { minutes } => {
                write!(out, ", setting {}m zero temp. ", n(*minutes))
            }
            Self::SettingRate { rate } => write!(out, ", setting {}U/hr. ", n(*rate)),
            Self::FallingFaster {
                eventual_bg,
                min_bg,
                delta,
                expected_delta,
                use_min_delta,
            } => {
                if *use_min_delta {
                    write!(
                        out,
                        "Eventual BG {} > {} but Min. Delta {:.2} < Exp. Delta {}",
                        bg(*eventual_bg),
                        bg(*min_bg),
                        delta,
                        bg(*expected_delta)
                    )
                } else {
                    write!(
                        out,
                        "Eventual BG {} > {} but Delta {} < Exp. Delta {}",
                        bg(*eventual_bg),
                        bg(*min_bg),
                        bg(*delta),
                        bg(*expected_delta)
                    )
                }
            }
            Self::InRange {
                eventual_bg,
                min_pred_bg,
            } => write!(
                out,
                "{}-{} in range: no temp required",
                bg(*eventual_bg),
                bg(*min_pred_bg)
            ),
            Self::EventualAboveMax {
                eventual_bg,
                max_bg,
            } => write!(out, "Eventual BG {} >= {}, ", bg(*eventual_bg), bg(*max_bg)),
            Self::IobAboveMax { iob, max_iob } => {
                write!(out, "IOB {} > maxIOB {}", n(round_to(*iob, 2)), n(*max_iob))
            }
            Self::CappedByMaxIob { max_iob } => write!(out, "maxIOB {}, ", n(*max_iob)),
            Self::InsulinRequired(req) => write!(out, "Ins.Req:, {}, ", n(*req)),
            Self::SmbInsulinReq(req) => write!(out, " insulinReq {}", n(*req)),
            Self::SmbMaxBolus(m) => write!(out, "; maxBolus {}", n(*m)),
            Self::SmbLowTemp { minutes, rate } => write!(
                out,
                "; setting {}m low temp of {}U/h",
                n(*minutes),
                n(*rate)
            ),
            Self::Period => out.write_str(". "),
            Self::Microbolus {
                units,
                iob_th_capped,
            } => write!(
                out,
                "Microbolusing {}U{}. ",
                n(*units),
                if *iob_th_capped { ", capped by autoISF iobTH" } else { "" }
            ),
            Self::WaitingToMicrobolus { minutes, seconds } => write!(
                out,
                "Waiting {}m {}s to microbolus again. ",
                n(*minutes),
                n(*seconds)
            ),
            Self::AdjustedToMaxSafe { rate, max_safe } => write!(
                out,
                "adj. req. rate: {} to maxSafeBasal: {}, ",
                n(*rate),
                n(*max_safe)
            ),
            Self::RunningTempAboveNeed {
                minutes,
                rate,
                new_rate,
            } => write!(
                out,
                "{}m@{:.2} > 2 * insulinReq. Setting temp basal of {}U/hr. ",
                n(*minutes),
                rate,
                n(*new_rate)
            ),
            Self::NoTempSetting { rate } => write!(out, "no temp, setting {}U/hr. ", n(*rate)),
            Self::TempAtOrAboveRequired { rate, required } => write!(
                out,
                "temp {} >~ req {}U/hr. ",
                n(*rate),
                n(*required)
            ),
            Self::TempBelowRequired { rate, required } => {
                write!(out, "temp {}<{}U/hr. ", n(*rate), n(*required))
            }

            Self::Sentence => out.write_str(". "),
            Self::RateLimitedByMaxSafe { rate, max_safe } => write!(
                out,
                "TBR {}U/hr limited by maxSafeBasal {}U/hr",
                n(*rate),
                n(*max_safe)
            ),
            Self::KetoVariable { cutoff } => write!(out, "KetoVarProt:, {}U/hr, ", n(*cutoff)),
            Self::KetoVariableInactive {
                iob,
                basal,
                activity,
            } => write!(
                out,
                "KetoVarProt:, not active, IOB {} ?< -{}, iobActivity: {} ?< 0, ",
                n(round_to(*iob, 2)),
                n(*basal),
                n(round_to(*activity, 3))
            ),
            Self::KetoContinuous { cutoff } => write!(out, "KetoProt:, {}U/hr, ", n(*cutoff)),
            Self::NoChangeNecessary {
                minutes,
                rate,
                suggested,
            } => write!(
                out,
                ", {}m left and {} ~ req {}U/hr: no change necessary",
                n(*minutes),
                n(*rate),
                n(*suggested)
            ),
            Self::NeutralCancel => out.write_str(
                "Suggested rate is same as profile rate, a temp basal is active, canceling current temp",
            ),
            Self::NeutralNoTemp => out.write_str(
                "Suggested rate is same as profile rate, no temp basal is active, doing nothing",
            ),
            Self::NeutralSetting { basal } => {
                write!(out, "Setting neutral temp basal of {}U/hr", n(*basal))
            }
        };
    }
}

fn render_fit(note: FitNote, units: Units, out: &mut String) {
    let bg = |v: f64| Num(convert_bg(v, units));
    let _ = match note {
        FitNote::PredictsMax { value, minutes } => write!(
            out,
            "predicts a Max of {}, in about {}min",
            bg(value),
            Num(minutes.abs())
        ),
        FitNote::PredictsMin { value, minutes } => write!(
            out,
            "predicts a Min of {}, in about {}min",
            bg(value),
            Num(minutes.abs())
        ),
        FitNote::BrakeBelowTarget { weight } => write!(
            out,
            "predicts BG below target soon, applying bgBrake ISF weight of {}",
            Num(weight)
        ),
        FitNote::SawMax { value, minutes } => write!(
            out,
            "saw Max of {}, about {}min ago",
            bg(value),
            Num(minutes.abs())
        ),
        FitNote::SawMin { value, minutes } => write!(
            out,
            "saw Min of {}, about {}min ago",
            bg(value),
            Num(minutes.abs())
        ),
        FitNote::LowCorrelation { correlation } => write!(
            out,
            "acce_ISF by-passed, as correlation, {}, is too low",
            Num(round_to(correlation, 2))
        ),
    };
}

/// Ordered list of reason events for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasonTrail {
    units: Units,
    events: Vec<ReasonEvent>,
}

impl ReasonTrail {
    pub fn new(units: Units) -> Self {
        Self {
            units,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: ReasonEvent) {
        self.events.push(event);
    }

    pub fn prepend(&mut self, event: ReasonEvent) {
        self.events.insert(0, event);
    }

    /// Append as a new sentence: separated by ". " when the trail already
    /// has content.
    pub fn sentence(&mut self, event: ReasonEvent) {
        if !self.events.is_empty() {
            self.events.push(ReasonEvent::Sentence);
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[ReasonEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, pred: impl Fn(&ReasonEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.events {
            e.render(self.units, &mut out);
        }
        out
    }
}

impl fmt::Display for ReasonTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for ReasonTrail {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_for_display() {
        assert_eq!(convert_bg(99.6, Units::MgDl), 100.0);
        assert_eq!(convert_bg(100.0, Units::MmolL), 5.6);
    }

    #[test]
    fn sentence_separates_only_after_content() {
        let mut t = ReasonTrail::new(Units::MgDl);
        t.sentence(ReasonEvent::NeutralSetting { basal: 1.0 });
        t.sentence(ReasonEvent::RateLimitedByMaxSafe {
            rate: 5.0,
            max_safe: 3.5,
        });
        assert_eq!(
            t.render(),
            "Setting neutral temp basal of 1U/hr. TBR 5U/hr limited by maxSafeBasal 3.5U/hr"
        );
    }

    #[test]
    fn lgs_reason_mentions_guard_bg() {
        let mut t = ReasonTrail::new(Units::MgDl);
        t.push(ReasonEvent::Lgs {
            min_guard_bg: 54.2,
            threshold: 70.0,
        });
        assert_eq!(t.render(), "minGuardBG 54<70");
    }
}
