//! One decision cycle, stage by stage.
//!
//! Stages run in a fixed order over a [`DecisionContext`]. Each returns a
//! [`Step`]: `Continue` hands its result to the next stage, `Break` means the
//! record is final. Data errors end the cycle through the record's `error`
//! slot; nothing here panics or propagates.

use core::ops::ControlFlow;

use chrono::Timelike;
use oref_traits::{BasalRounder, CarbRatioLookup};

use crate::autoisf::{AutoIsfInputs, auto_isf};
use crate::config::{CgmGuardStyle, FlatCgmRule, Settings};
use crate::decision::TempBasalRequest;
use crate::dynamic_isf::{self, DynamicIsf};
use crate::error::DecisionError;
use crate::predict::{IobPoint, PredictionInputs, Predictions, predict};
use crate::reason::{GuardTrip, ReasonEvent};
use crate::rounding::PumpRounding;
use crate::schedule::CarbRatioSchedule;
use crate::sensitivity::{self, Observed, Sensitivity, SensitivityStrategy};
use crate::smb::{self, MicroBolusInputs};
use crate::status::SmbStatus;
use crate::tdd::{TddBreakdown, last_qualifying_bolus, total_daily_dose};
use crate::temp_basal::TempBasalSetter;
use crate::types::{CurrentTemp, CycleInputs, IobTick};
use crate::util::{minutes_between, round_to, round0};

/// Marker for a finished record.
#[derive(Debug)]
pub struct Decided;

/// Outcome of one stage.
pub type Step<T = ()> = ControlFlow<Decided, T>;

/// State shared by the stages of one cycle.
pub struct DecisionContext<'a, R> {
    pub inputs: &'a CycleInputs,
    pub settings: &'a Settings,
    pub setter: TempBasalSetter<'a, R>,
    pub rec: TempBasalRequest,
}

impl<R: BasalRounder> DecisionContext<'_, R> {
    fn fail<T>(&mut self, err: DecisionError) -> Step<T> {
        tracing::error!(error = %err, "decision aborted");
        self.rec.error = Some(err);
        ControlFlow::Break(Decided)
    }

    fn current(&self) -> CurrentTemp {
        self.inputs.current_temp
    }

    /// Route a temp through the setter and finish.
    fn set_temp<T>(&mut self, rate: f64, duration: f64) -> Step<T> {
        let current = self.current();
        self.setter.apply(&mut self.rec, current, rate, duration);
        ControlFlow::Break(Decided)
    }

    fn push(&mut self, event: ReasonEvent) {
        self.rec.push(event);
    }
}

/// Glucose trend the branches compare against.
#[derive(Debug, Clone, Copy)]
struct Trend {
    bg: f64,
    delta: f64,
    min_delta: f64,
    min_avg_delta: f64,
    max_delta: f64,
}

/// Aftercare boost state.
#[derive(Debug, Clone, Copy, Default)]
struct Boost {
    active: bool,
    rate: f64,
    minutes_left: f64,
    /// SMB may run alongside the boost.
    smb_allowed: bool,
}

/// Everything the dosing branches read, computed before the first branch.
#[derive(Debug)]
struct Dosing {
    trend: Trend,
    prep: Sensitivity,
    sens: f64,
    iob: f64,
    eventual_bg: f64,
    naive_eventual_bg: f64,
    expected_delta: f64,
    preds: Predictions,
    enable_smb: bool,
    status: SmbStatus,
    smb_ratio: f64,
    boost: Boost,
}

/// Determines one temp basal / micro-bolus recommendation per cycle.
pub struct DecisionEngine<R = PumpRounding, C = CarbRatioSchedule> {
    pub(crate) settings: Settings,
    pub(crate) rounder: R,
    pub(crate) carb_ratios: C,
}

impl DecisionEngine {
    /// Engine with the pump-model rounding and the profile's carb-ratio
    /// schedule.
    pub fn new(settings: Settings) -> Self {
        let rounder = PumpRounding::new(settings.profile.model.clone());
        let carb_ratios = settings.profile.carb_ratios.clone();
        Self {
            settings,
            rounder,
            carb_ratios,
        }
    }
}

/// Run one cycle with the default collaborators.
pub fn determine_basal(settings: &Settings, inputs: &CycleInputs) -> TempBasalRequest {
    DecisionEngine::new(settings.clone()).determine(inputs)
}

impl<R: BasalRounder, C: CarbRatioLookup> DecisionEngine<R, C> {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rounder(&self) -> &R {
        &self.rounder
    }

    /// Produce the decision record for `inputs`.
    pub fn determine(&self, inputs: &CycleInputs) -> TempBasalRequest {
        let s = &self.settings;
        let g = &inputs.glucose;
        let mut ctx = DecisionContext {
            inputs,
            settings: s,
            setter: TempBasalSetter::new(&s.profile, &s.keto, s.smb.skip_neutral_temps, &self.rounder),
            rec: TempBasalRequest::new(inputs.now, g.glucose, g.delta, s.profile.units),
        };
        ctx.rec.reservoir = inputs.reservoir;
        let _ = self.run(&mut ctx);
        let rec = ctx.rec;
        tracing::info!(
            rate = ?rec.rate,
            duration = ?rec.duration,
            units = ?rec.units,
            eventual_bg = ?rec.eventual_bg,
            error = rec.error.is_some(),
            reason = %rec.reason,
            "decision"
        );
        rec
    }

    fn run(&self, ctx: &mut DecisionContext<'_, R>) -> Step {
        self.validate_profile(ctx)?;
        self.cgm_guard(ctx)?;

        let s = ctx.settings;
        let inputs = ctx.inputs;
        let tdd = total_daily_dose(&inputs.pump_history, &s.profile.basal_schedule, inputs.now, s.profile.bolus_increment);
        ctx.rec.insulin = Some(tdd);

        let strategy = SensitivityStrategy::select(s);
        let base = sensitivity::base_targets(s);
        if !(base.min_bg > 0.0 && base.max_bg > 0.0 && base.target_bg > 0.0) {
            return ctx.fail(DecisionError::MissingTarget);
        }
        let dynamic = self.dynamic_isf(ctx, strategy, base.target_bg, &tdd);
        let prep = sensitivity::prepare(
            s,
            Observed {
                bg: inputs.glucose.glucose,
                noise: inputs.glucose.noise,
                autosens_ratio: inputs.autosens_ratio,
                carb_ratio: self.carb_ratio(ctx),
                dynamic: dynamic.as_ref().ok(),
            },
            &self.rounder,
        );

        let ticks = match iob_points(&inputs.iob.ticks) {
            Ok(t) => t,
            Err(e) => return ctx.fail(e),
        };
        let iob = ticks[0].iob;

        let trend = glucose_trend(ctx);
        let boost = self.boost(ctx, &prep, trend);
        let status = smb::loop_smb(s, inputs.micro_bolus_allowed, iob, !boost.active || boost.smb_allowed, prep.exercise_ratio);
        let mut enable_smb = if inputs.micro_bolus_allowed && status != SmbStatus::Oref {
            status.forces_smb()
        } else {
            smb::enable_smb(s, inputs.micro_bolus_allowed, &inputs.meal, trend.bg, prep.targets.target_bg)
        };
        if s.overrides.smb_off_at(inputs.now.hour()) {
            tracing::info!("SMB switched off by override schedule");
            enable_smb = false;
        }

        let (sens, isf_ratios, mut isf_notes) = match strategy {
            SensitivityStrategy::Dynamic => (prep.sens, None, Vec::new()),
            SensitivityStrategy::AutoIsf | SensitivityStrategy::Autosens => {
                let exercise = s.targets.exercise_setting() && s.profile.temptarget_set && prep.targets.target_bg > 100.0;
                let out = auto_isf(
                    AutoIsfInputs {
                        glucose: &inputs.glucose,
                        meal: &inputs.meal,
                        now: inputs.now,
                        profile_sens: prep.profile_sens,
                        sens: prep.sens,
                        sensitivity_ratio: prep.ratio,
                        target_bg: prep.targets.target_bg,
                        status,
                        exercise,
                    },
                    &s.autoisf,
                );
                let ratios = (strategy == SensitivityStrategy::AutoIsf).then_some(out.ratios);
                (out.sens, ratios, out.notes)
            }
        };

        self.stale_temp(ctx)?;

        let tick0 = ticks[0];
        let bgi = round_to(-tick0.activity * sens * 5.0, 2);
        let mut deviation = round0(6.0 * (trend.min_delta - bgi));
        if deviation < 0.0 {
            deviation = round0(6.0 * (trend.min_avg_delta - bgi));
            if deviation < 0.0 {
                deviation = round0(6.0 * (inputs.glucose.long_avg_delta - bgi));
            }
        }
        let naive_eventual_bg = if iob > 0.0 {
            round0(trend.bg - iob * sens)
        } else {
            round0(trend.bg - iob * sens.min(prep.profile_sens))
        };
        let eventual_bg = naive_eventual_bg + deviation;
        if !eventual_bg.is_finite() {
            return ctx.fail(DecisionError::EventualBgNan { sens, deviation });
        }
        let target_bg = prep.targets.target_bg;
        let expected_delta = round_to(bgi + (target_bg - eventual_bg) / 24.0, 1);
        tracing::debug!(bgi, deviation, naive_eventual_bg, eventual_bg, expected_delta, "eventual bg");

        let rec = &mut ctx.rec;
        rec.eventual_bg = Some(eventual_bg);
        rec.sensitivity_ratio = Some(prep.ratio);
        rec.cr = Some(round_to(prep.carb_ratio, 2));
        rec.isf = Some(sens);
        rec.isf_ratios = isf_ratios;
        rec.current_target = Some(target_bg);
        rec.threshold = Some(prep.threshold);
        rec.cob = inputs.meal.meal_cob;
        rec.iob = iob;
        rec.bolus_iob = inputs.iob.bolus_iob;
        rec.basal_iob = inputs.iob.basal_iob;
        rec.iob_activity = Some(tick0.activity);
        rec.bgi = Some(bgi);
        rec.deviation = Some(deviation);
        rec.min_delta = Some(trend.min_delta);
        rec.expected_delta = Some(expected_delta);

        let log_isf = dynamic.as_ref().ok().and_then(|d| d.log_isf);
        let preds = predict(
            &PredictionInputs {
                ticks: &ticks,
                meal: &inputs.meal,
                bg: trend.bg,
                sens,
                carb_ratio: prep.carb_ratio,
                min_delta: trend.min_delta,
                bgi,
                sensitivity_ratio: prep.ratio,
                target_bg,
                threshold: prep.threshold,
                enable_uam: s.smb.enable_uam,
                floating_carbs: s.smb.floating_carbs,
                remaining_carbs_cap: s.profile.remaining_carbs_cap,
                remaining_carbs_fraction: s.profile.remaining_carbs_fraction,
                max_carb_absorption_rate: s.profile.max_carb_absorption_rate,
                carb_age_minutes: inputs.meal.last_carb_time.map(|t| minutes_between(inputs.now, t)),
                log_isf,
            },
            naive_eventual_bg,
            eventual_bg,
        );
        let rec = &mut ctx.rec;
        rec.eventual_bg = Some(preds.eventual_bg);
        rec.min_guard_bg = Some(preds.min_guard_bg);
        rec.min_pred_bg = Some(preds.min_pred_bg);
        rec.pred_bgs = preds.curves.clone();
        rec.insulin_for_manual_bolus = round_to((preds.eventual_bg - target_bg) / sens, 2);
        if let Some((cid, cob_cid)) = preds.carbs.floating {
            isf_notes.push(ReasonEvent::FloatingCarbs {
                cid,
                carbs: inputs.meal.carbs,
                cob_cid,
                cob: inputs.meal.meal_cob,
            });
        }

        let smb_ratio = smb::delivery_ratio(s, trend.bg, target_bg, status);
        rec.smb_ratio = Some(smb_ratio);

        let mut d = Dosing {
            trend,
            prep,
            sens,
            iob,
            eventual_bg: preds.eventual_bg,
            naive_eventual_bg,
            expected_delta,
            preds,
            enable_smb,
            status,
            smb_ratio,
            boost,
        };
        self.header(ctx, &d, strategy, isf_notes, &tdd, dynamic.as_ref());
        self.carbs_required(ctx, &mut d);
        self.dose(ctx, &d)
    }

    fn validate_profile(&self, ctx: &mut DecisionContext<'_, R>) -> Step {
        let p = &ctx.settings.profile;
        if !p.current_basal.is_finite() || p.current_basal < 0.0 {
            return ctx.fail(DecisionError::InvalidProfile("could not get current basal rate".into()));
        }
        if !(p.sens.is_finite() && p.sens > 0.0) {
            return ctx.fail(DecisionError::InvalidProfile("could not get sensitivity".into()));
        }
        ControlFlow::Continue(())
    }

    fn carb_ratio(&self, ctx: &DecisionContext<'_, R>) -> f64 {
        self.carb_ratios.carb_ratio(ctx.inputs.now).unwrap_or_else(|| {
            tracing::warn!(fallback = ctx.settings.profile.carb_ratio, "no carb ratio for this time, using profile value");
            ctx.settings.profile.carb_ratio
        })
    }

    fn dynamic_isf(
        &self,
        ctx: &DecisionContext<'_, R>,
        strategy: SensitivityStrategy,
        profile_target: f64,
        tdd: &TddBreakdown,
    ) -> Result<DynamicIsf, &'static str> {
        if strategy != SensitivityStrategy::Dynamic {
            return Err("not selected");
        }
        let out = dynamic_isf::evaluate(
            ctx.settings,
            ctx.inputs.glucose.glucose,
            profile_target,
            sensitivity::override_sens(ctx.settings),
            tdd,
            ctx.inputs.tdd_averages,
        );
        if let Err(why) = out {
            tracing::info!(why, "dynamic ISF off this cycle");
        }
        out
    }

    // ── Stage: CGM guard ─────────────────────────────────────────────────────

    fn cgm_guard(&self, ctx: &mut DecisionContext<'_, R>) -> Step {
        let inputs = ctx.inputs;
        let g = &inputs.glucose;
        let now = inputs.now;
        let s = ctx.settings;
        let bg = g.glucose;
        let minutes_ago = round_to(minutes_between(now, g.date), 1);
        let basal = self.rounder.round_basal(s.profile.current_basal) * s.overrides.factor();

        let noisy = bg <= 10.0 || bg == 38.0 || g.noise >= 3.0;
        let stale = minutes_ago > 12.0 || minutes_ago < -5.0;
        let unchanged = g.short_avg_delta == 0.0 && g.long_avg_delta == 0.0;
        let long_flat = bg > 60.0 && g.cgm_flat_minutes > 89.0;
        let flat = match s.guards.flat_cgm_rule {
            FlatCgmRule::Duration => long_flat || unchanged,
            // simulator feeds are allowed to sit still
            FlatCgmRule::ZeroDelta => {
                bg > 60.0
                    && g.delta == 0.0
                    && g.short_avg_delta.abs() < 1.0
                    && g.long_avg_delta.abs() < 1.0
                    && g.device.as_deref() != Some("fakecgm")
            }
        };
        if !(noisy || stale || flat) {
            return ControlFlow::Continue(());
        }
        let calibrated = g.last_calibration_age.is_some_and(|a| a > 0 && a < 3);
        let trip = if stale {
            GuardTrip::Stale
        } else if flat && calibrated {
            GuardTrip::JustCalibrated
        } else if flat && s.guards.flat_cgm_rule == FlatCgmRule::Duration && long_flat {
            GuardTrip::Flat
        } else if flat {
            GuardTrip::Unchanged
        } else {
            GuardTrip::Noisy
        };
        tracing::warn!(?trip, minutes_ago, bg, noise = g.noise, "cgm data unusable");
        let event = ReasonEvent::CgmGuard {
            trip,
            minutes_ago,
            now: now.to_rfc3339(),
            bg_time: g.date.to_rfc3339(),
            flat_minutes: g.cgm_flat_minutes,
            bg,
            delta: g.delta,
            short: g.short_avg_delta,
            long: g.long_avg_delta,
        };
        ctx.push(event);

        let current = ctx.current();
        match s.guards.cgm_guard_style {
            CgmGuardStyle::Neutral => {
                if current.rate > basal {
                    ctx.push(ReasonEvent::GuardReplaceHighTemp {
                        rate: current.rate,
                        basal,
                    });
                    ctx.set_temp(basal, 30.0)
                } else if current.rate == 0.0 && current.duration > 30.0 {
                    ctx.push(ReasonEvent::GuardShortenZeroTemp {
                        minutes: current.duration,
                    });
                    ctx.set_temp(0.0, 30.0)
                } else {
                    ctx.push(ReasonEvent::GuardNothing {
                        rate: current.rate,
                        basal: round_to(basal, 2),
                    });
                    ControlFlow::Break(Decided)
                }
            }
            CgmGuardStyle::Cancel => {
                if current.duration > 0.0 && current.rate >= basal {
                    ctx.push(ReasonEvent::GuardCancelHighTemp { rate: current.rate });
                    ctx.rec.set_temp(0.0, 0.0);
                } else if current.rate == 0.0 && current.duration > 30.0 {
                    ctx.push(ReasonEvent::GuardShortenZeroTemp {
                        minutes: current.duration,
                    });
                    ctx.rec.set_temp(0.0, 30.0);
                } else {
                    ctx.push(ReasonEvent::GuardNothing {
                        rate: current.rate,
                        basal: round_to(basal, 2),
                    });
                }
                ControlFlow::Break(Decided)
            }
        }
    }

    // ── Stage: aftercare boost ───────────────────────────────────────────────

    fn boost(&self, ctx: &DecisionContext<'_, R>, prep: &Sensitivity, trend: Trend) -> Boost {
        let s = ctx.settings;
        let b = &s.b30;
        if !(b.enabled && s.autoisf.enabled) {
            return Boost::default();
        }
        let (amount, age) = last_qualifying_bolus(&ctx.inputs.pump_history, b.start_bolus, ctx.inputs.now, &self.rounder)
            .unwrap_or((0.0, 0.0));
        let age = if age == 0.0 { 1.0 } else { age };
        let active = amount >= b.start_bolus
            && age <= b.duration
            && s.profile.temptarget_set
            && prep.targets.target_bg == b.target;
        if !active {
            return Boost::default();
        }
        let smb_allowed = !(trend.delta <= b.upper_delta && trend.bg < b.upper_bg);
        let rate = self.rounder.round_basal(prep.basal * b.factor);
        tracing::info!(rate, bolus = amount, age, smb_allowed, "aftercare boost running");
        Boost {
            active,
            rate,
            minutes_left: b.duration - age,
            smb_allowed,
        }
    }

    // ── Stage: stale temp ────────────────────────────────────────────────────

    fn stale_temp(&self, ctx: &mut DecisionContext<'_, R>) -> Step {
        let Some(last) = ctx.inputs.iob.last_temp else {
            return ControlFlow::Continue(());
        };
        let current = ctx.current();
        let age = round0(minutes_between(ctx.inputs.now, last.date));
        if ctx.inputs.micro_bolus_allowed && current.rate != last.rate && age > 10.0 && current.duration != 0.0 {
            tracing::warn!(current = current.rate, last = last.rate, age, "running temp does not match pump history");
            ctx.rec.reason.sentence(ReasonEvent::TempRateMismatch {
                current: current.rate,
                last: last.rate,
            });
            return ctx.set_temp(0.0, 0.0);
        }
        let ended = age - last.duration;
        if current.duration > 0.0 && ended > 5.0 && age > 10.0 {
            tracing::warn!(ended, "running temp outlived the last logged temp");
            ctx.rec.reason.sentence(ReasonEvent::LastTempEnded { minutes: ended });
            return ctx.set_temp(0.0, 0.0);
        }
        ControlFlow::Continue(())
    }

    // ── Header ───────────────────────────────────────────────────────────────

    fn header(
        &self,
        ctx: &mut DecisionContext<'_, R>,
        d: &Dosing,
        strategy: SensitivityStrategy,
        isf_notes: Vec<ReasonEvent>,
        tdd: &TddBreakdown,
        dynamic: Result<&DynamicIsf, &&'static str>,
    ) {
        let cob = ctx.inputs.meal.meal_cob;
        let rec = &mut ctx.rec;
        let deviation = rec.deviation.unwrap_or(0.0);
        let bgi = rec.bgi.unwrap_or(0.0);
        if d.boost.active {
            rec.push(ReasonEvent::B30Running {
                rate: d.boost.rate,
                minutes: d.boost.minutes_left,
            });
        }
        if strategy == SensitivityStrategy::AutoIsf {
            rec.push(ReasonEvent::SmbDeliveryRatio(d.smb_ratio));
        }
        for e in d.prep.notes.iter().cloned().chain(isf_notes) {
            rec.push(e);
        }
        let p = &d.preds;
        rec.push(ReasonEvent::Summary {
            cob,
            deviation,
            bgi,
            isf: d.sens,
            cr: round_to(d.prep.carb_ratio, 2),
            target: d.prep.targets.target_bg,
            min_pred_bg: p.min_pred_bg,
            min_guard_bg: p.min_guard_bg,
            iob_pred_bg: p.last_iob_pred_bg,
            cob_pred_bg: p.last_cob_pred_bg,
            uam_pred_bg: p.last_uam_pred_bg,
        });
        if tdd.enough_history() {
            rec.push(ReasonEvent::Tdd {
                total: tdd.total,
                bolus_percent: tdd.bolus_percent(),
                basal_percent: tdd.basal_percent(),
            });
        } else {
            rec.push(ReasonEvent::TddInsufficient);
        }
        if strategy == SensitivityStrategy::Dynamic {
            match dynamic {
                Ok(dy) => {
                    rec.push(ReasonEvent::DynamicIsf {
                        sigmoid: dy.sigmoid,
                        dynamic_cr: dy.dynamic_cr,
                        adjustment_factor: dy.adjustment_factor,
                        ratio: dy.ratio,
                    });
                    if let Some(r) = d.prep.basal_ratio {
                        rec.push(ReasonEvent::BasalRatio(r));
                    }
                }
                Err(why) => rec.push(ReasonEvent::DynamicIsfOff(*why)),
            }
        }
        rec.push(ReasonEvent::EndOfHeader);
    }

    // ── Carbs required and SMB disables ──────────────────────────────────────

    fn carbs_required(&self, ctx: &mut DecisionContext<'_, R>, d: &mut Dosing) {
        let s = ctx.settings;
        let inputs = ctx.inputs;
        let meal = &inputs.meal;
        let threshold = d.prep.threshold;
        let min_guard_bg = d.preds.min_guard_bg;
        let bg = d.trend.bg;

        let carbs_req_bg = if d.naive_eventual_bg < 40.0 {
            min_guard_bg.min(d.naive_eventual_bg)
        } else {
            d.naive_eventual_bg
        };
        let undershoot = threshold - carbs_req_bg;
        let curve = d.preds.curves.cob.as_ref().unwrap_or(&d.preds.curves.iob);
        let minutes_below = |level: f64| {
            curve
                .iter()
                .position(|&v| v < level)
                .map_or(240.0, |i| 5.0 * i as f64)
        };
        let minutes_above_min = minutes_below(d.prep.targets.min_bg);
        let minutes_above_threshold = minutes_below(threshold);
        tracing::debug!(minutes_above_min, minutes_above_threshold, "time until below target");

        if d.enable_smb && min_guard_bg < threshold {
            tracing::info!(min_guard_bg, threshold, "SMB disabled: minGuardBG below threshold");
            d.enable_smb = false;
            ctx.rec.manual_bolus_error = 1;
        }
        let pct = {
            let base = s.smb.max_delta_bg_threshold.map_or(0.2, |v| v.min(0.4));
            if d.status == SmbStatus::FullLoop { base.max(0.3) } else { base }
        };
        if d.trend.max_delta > pct * bg {
            ctx.push(ReasonEvent::MaxDeltaDisablesSmb {
                max_delta: d.trend.max_delta,
                percent: pct,
                bg,
            });
            d.enable_smb = false;
        }

        let zero_temp_effect = s.profile.current_basal * s.overrides.factor() * d.sens * minutes_above_threshold / 60.0;
        let cob_for_carbs_req = (meal.meal_cob - 0.25 * meal.carbs).max(0.0);
        let carbs_req = round0((undershoot - zero_temp_effect) / d.preds.carbs.csf - cob_for_carbs_req);
        if carbs_req >= s.profile.carbs_req_threshold && minutes_above_threshold <= 45.0 {
            tracing::info!(carbs_req, minutes = minutes_above_threshold, "additional carbs required");
            ctx.push(ReasonEvent::CarbsRequired {
                carbs: carbs_req,
                minutes: minutes_above_threshold,
            });
            ctx.rec.carbs_req = Some(carbs_req);
        }
    }

    // ── Dosing branches ──────────────────────────────────────────────────────

    fn hold_or_neutral(&self, ctx: &mut DecisionContext<'_, R>, basal: f64) -> Step {
        let current = ctx.current();
        if current.duration > 15.0 && self.rounder.round_basal(basal) == self.rounder.round_basal(current.rate) {
            ctx.push(ReasonEvent::TempMatchesBasal {
                rate: current.rate,
                basal: round_to(basal, 2),
            });
            return ControlFlow::Break(Decided);
        }
        ctx.push(ReasonEvent::SettingCurrentBasal { basal });
        ctx.set_temp(basal, 30.0)
    }

    fn dose(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        if d.boost.active {
            ctx.push(ReasonEvent::B30Forced {
                rate: self.rounder.round_basal(d.boost.rate),
                minutes: d.boost.minutes_left,
            });
            return ctx.set_temp(d.boost.rate, 30.0);
        }
        self.low_glucose_suspend(ctx, d)?;
        self.top_of_hour(ctx, d)?;
        self.below_target(ctx, d)?;
        self.falling_or_in_range(ctx, d)?;
        self.above_target(ctx, d)
    }

    fn low_glucose_suspend(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        let s = ctx.settings;
        let bg = d.trend.bg;
        let threshold = d.prep.threshold;
        let min_guard_bg = d.preds.min_guard_bg;
        let target_bg = d.prep.targets.target_bg;
        let profile_basal = s.profile.current_basal * s.overrides.factor();
        let iob_floor = -profile_basal * 20.0 / 60.0;

        if bg < threshold && d.iob < iob_floor && d.trend.min_delta > 0.0 && d.trend.min_delta > d.expected_delta {
            ctx.push(ReasonEvent::LgsException {
                iob: d.iob,
                limit: iob_floor,
                min_delta: d.trend.min_delta,
                expected_delta: d.expected_delta,
            });
            return ControlFlow::Continue(());
        }
        if bg < threshold || min_guard_bg < threshold {
            ctx.push(ReasonEvent::Lgs {
                min_guard_bg,
                threshold,
            });
            if min_guard_bg < threshold {
                ctx.rec.manual_bolus_error = 2;
            }
            let undershoot = target_bg - min_guard_bg;
            let worst = undershoot / d.sens;
            let mut minutes = round0(60.0 * worst / profile_basal);
            minutes = (round0(minutes / 30.0) * 30.0).clamp(30.0, 120.0);
            tracing::warn!(min_guard_bg, threshold, minutes, "low glucose suspend");
            return ctx.set_temp(0.0, minutes);
        }
        ControlFlow::Continue(())
    }

    fn top_of_hour(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        let minute = ctx.inputs.now.minute();
        if ctx.settings.smb.skip_neutral_temps && minute >= 55 && !d.enable_smb {
            ctx.push(ReasonEvent::TopOfHourCancel { minutes: 60 - minute });
            return ctx.set_temp(0.0, 0.0);
        }
        ControlFlow::Continue(())
    }

    fn below_target(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        let t = &d.prep.targets;
        if d.eventual_bg >= t.min_bg {
            return ControlFlow::Continue(());
        }
        let basal = d.prep.basal;
        let trend = d.trend;
        ctx.push(ReasonEvent::EventualBelowMin {
            eventual_bg: d.eventual_bg,
            min_bg: t.min_bg,
        });
        if trend.min_delta > d.expected_delta && trend.min_delta > 0.0 && ctx.rec.carbs_req.is_none() {
            if d.naive_eventual_bg < 40.0 {
                ctx.push(ReasonEvent::NaiveBelow40);
                return ctx.set_temp(0.0, 30.0);
            }
            if trend.delta > trend.min_delta {
                ctx.push(ReasonEvent::DeltaAboveExpected {
                    delta: trend.delta,
                    expected_delta: d.expected_delta,
                });
            } else {
                ctx.push(ReasonEvent::MinDeltaAboveExpected {
                    min_delta: trend.min_delta,
                    expected_delta: d.expected_delta,
                });
            }
            return self.hold_or_neutral(ctx, basal);
        }

        let mut insulin_req = round_to(2.0 * ((d.eventual_bg - t.target_bg) / d.sens).min(0.0), 2);
        let naive_req = round_to(((d.naive_eventual_bg - t.target_bg) / d.sens).min(0.0), 2);
        if trend.min_delta < 0.0 && trend.min_delta > d.expected_delta {
            insulin_req = round_to(insulin_req * (trend.min_delta / d.expected_delta), 2);
        }
        let rate = self.rounder.round_basal(basal + 2.0 * insulin_req);
        ctx.rec.insulin_req = Some(insulin_req);
        let current = ctx.current();
        let scheduled = current.duration * (current.rate - basal) / 60.0;
        if scheduled < insulin_req.min(naive_req) - 0.3 * basal {
            ctx.push(ReasonEvent::RunningTempShortfall {
                minutes: current.duration,
                rate: current.rate,
            });
            return ctx.set_temp(rate, 30.0);
        }
        if current.duration > 5.0 && rate >= current.rate * 0.8 {
            ctx.push(ReasonEvent::TempAtLeastRequired {
                rate: current.rate,
                required: rate,
            });
            return ControlFlow::Break(Decided);
        }
        if rate <= 0.0 {
            let profile_basal = ctx.settings.profile.current_basal * ctx.settings.overrides.factor();
            let worst = (t.target_bg - d.naive_eventual_bg) / d.sens;
            let mut minutes = round0(60.0 * worst / profile_basal);
            if minutes < 0.0 {
                minutes = 0.0;
            } else {
                minutes = (round0(minutes / 30.0) * 30.0).clamp(0.0, 120.0);
            }
            if minutes > 0.0 {
                ctx.push(ReasonEvent::SettingZeroTemp { minutes });
                return ctx.set_temp(rate, minutes);
            }
        } else {
            ctx.push(ReasonEvent::SettingRate { rate });
        }
        ctx.set_temp(rate, 30.0)
    }

    fn falling_or_in_range(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        let t = &d.prep.targets;
        let trend = d.trend;
        let smb_on = ctx.inputs.micro_bolus_allowed && d.enable_smb;
        if trend.min_delta < d.expected_delta {
            if d.expected_delta - trend.min_delta >= 2.0 {
                ctx.rec.manual_bolus_error = if trend.min_delta >= 0.0 && d.expected_delta > 0.0 {
                    3
                } else if trend.min_delta < 0.0 {
                    4
                } else {
                    5
                };
            }
            if !smb_on {
                let use_min_delta = trend.delta >= trend.min_delta;
                ctx.push(ReasonEvent::FallingFaster {
                    eventual_bg: d.eventual_bg,
                    min_bg: t.min_bg,
                    delta: if use_min_delta { trend.min_delta } else { trend.delta },
                    expected_delta: d.expected_delta,
                    use_min_delta,
                });
                return self.hold_or_neutral(ctx, d.prep.basal);
            }
        }
        let min_pred_bg = d.preds.min_pred_bg;
        if d.eventual_bg.min(min_pred_bg) < t.max_bg {
            if min_pred_bg < t.min_bg && d.eventual_bg > t.min_bg {
                ctx.rec.manual_bolus_error = 6;
            }
            if !smb_on {
                ctx.push(ReasonEvent::InRange {
                    eventual_bg: d.eventual_bg,
                    min_pred_bg,
                });
                return self.hold_or_neutral(ctx, d.prep.basal);
            }
        }
        ControlFlow::Continue(())
    }

    #[allow(clippy::too_many_lines)]
    fn above_target(&self, ctx: &mut DecisionContext<'_, R>, d: &Dosing) -> Step {
        let s = ctx.settings;
        let t = &d.prep.targets;
        let max_iob = s.profile.max_iob;
        let basal = d.prep.basal;
        if d.eventual_bg >= t.max_bg {
            ctx.push(ReasonEvent::EventualAboveMax {
                eventual_bg: d.eventual_bg,
                max_bg: t.max_bg,
            });
        }
        if d.iob > max_iob {
            ctx.push(ReasonEvent::IobAboveMax { iob: d.iob, max_iob });
            return self.hold_or_neutral(ctx, basal);
        }

        let mut insulin_req = round_to((d.preds.min_pred_bg.min(d.eventual_bg) - t.target_bg) / d.sens, 2);
        if insulin_req > max_iob - d.iob {
            ctx.push(ReasonEvent::CappedByMaxIob { max_iob });
            insulin_req = max_iob - d.iob;
        }
        let mut rate = self.rounder.round_basal(basal + 2.0 * insulin_req);
        insulin_req = round_to(insulin_req, 3);
        ctx.rec.insulin_req = Some(insulin_req);
        ctx.rec.reason.prepend(ReasonEvent::InsulinRequired(round_to(insulin_req, 2)));

        let inputs = ctx.inputs;
        if inputs.micro_bolus_allowed && d.enable_smb && d.trend.bg > d.prep.threshold {
            let plan = smb::plan_micro_bolus(
                s,
                MicroBolusInputs {
                    insulin_req,
                    iob: d.iob,
                    cob: inputs.meal.meal_cob,
                    carb_ratio: d.prep.carb_ratio,
                    basal,
                    target_bg: t.target_bg,
                    naive_eventual_bg: d.naive_eventual_bg,
                    min_iob_pred_bg: d.preds.min_iob_pred_bg,
                    sens: d.sens,
                    delivery_ratio: d.smb_ratio,
                    exercise_ratio: d.prep.exercise_ratio,
                    status: d.status,
                },
            );
            ctx.push(ReasonEvent::SmbInsulinReq(insulin_req));
            if plan.units >= plan.max_bolus {
                ctx.push(ReasonEvent::SmbMaxBolus(plan.max_bolus));
            }
            if let Some((low_rate, minutes)) = plan.low_temp {
                ctx.push(ReasonEvent::SmbLowTemp {
                    minutes,
                    rate: low_rate,
                });
            }
            ctx.push(ReasonEvent::Period);

            let interval = smb::interval_minutes(s);
            let last_bolus_age = inputs
                .iob
                .last_bolus_time
                .map_or(f64::INFINITY, |at| round_to(minutes_between(inputs.now, at), 1));
            if last_bolus_age > interval {
                if plan.units > 0.0 {
                    ctx.rec.units = Some(plan.units);
                    ctx.push(ReasonEvent::Microbolus {
                        units: plan.units,
                        iob_th_capped: plan.iob_th_capped,
                    });
                    tracing::info!(units = plan.units, insulin_req, "microbolus");
                }
            } else {
                let wait = interval - last_bolus_age;
                ctx.push(ReasonEvent::WaitingToMicrobolus {
                    minutes: round0(wait),
                    seconds: round0(wait * 60.0) % 60.0,
                });
            }
            if let Some((low_rate, minutes)) = plan.low_temp {
                return ctx.set_temp(low_rate, minutes);
            }
        }

        let max_safe = ctx.setter.max_safe();
        if rate > max_safe {
            ctx.push(ReasonEvent::AdjustedToMaxSafe {
                rate: round_to(rate, 2),
                max_safe: round_to(max_safe, 2),
            });
            rate = self.rounder.round_basal(max_safe);
        }
        let current = ctx.current();
        let scheduled = current.duration * (current.rate - basal) / 60.0;
        if scheduled >= insulin_req * 2.0 {
            ctx.push(ReasonEvent::RunningTempAboveNeed {
                minutes: current.duration,
                rate: current.rate,
                new_rate: rate,
            });
            return ctx.set_temp(rate, 30.0);
        }
        if current.duration == 0.0 {
            ctx.push(ReasonEvent::NoTempSetting { rate });
            return ctx.set_temp(rate, 30.0);
        }
        if current.duration > 5.0 && self.rounder.round_basal(rate) <= self.rounder.round_basal(current.rate) {
            ctx.push(ReasonEvent::TempAtOrAboveRequired {
                rate: current.rate,
                required: rate,
            });
            return ControlFlow::Break(Decided);
        }
        ctx.push(ReasonEvent::TempBelowRequired {
            rate: current.rate,
            required: rate,
        });
        ctx.set_temp(rate, 30.0)
    }
}

fn glucose_trend<R>(ctx: &DecisionContext<'_, R>) -> Trend {
    let g = &ctx.inputs.glucose;
    Trend {
        bg: g.glucose,
        delta: g.delta,
        min_delta: g.delta.min(g.short_avg_delta),
        min_avg_delta: g.short_avg_delta.min(g.long_avg_delta),
        max_delta: g.delta.max(g.short_avg_delta).max(g.long_avg_delta),
    }
}

/// Validate the IOB model output; every tick must be complete.
pub fn iob_points(ticks: &[IobTick]) -> Result<Vec<IobPoint>, DecisionError> {
    if ticks.is_empty() {
        return Err(DecisionError::MissingIob);
    }
    ticks
        .iter()
        .map(|t| {
            Ok(IobPoint {
                iob: t.iob.ok_or(DecisionError::MissingIobField("iob"))?,
                activity: t.activity.ok_or(DecisionError::MissingIobField("activity"))?,
                zero_temp_activity: t
                    .zero_temp_activity
                    .ok_or(DecisionError::MissingIobField("zero_temp_activity"))?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_iob_is_missing() {
        assert_eq!(iob_points(&[]), Err(DecisionError::MissingIob));
    }

    #[test]
    fn incomplete_tick_names_the_field() {
        let broken = IobTick {
            activity: None,
            ..IobTick::new(0.0, 0.0, 0.0)
        };
        let ticks = [IobTick::new(0.0, 0.0, 0.0), broken];
        assert_eq!(iob_points(&ticks), Err(DecisionError::MissingIobField("activity")));
    }
}
