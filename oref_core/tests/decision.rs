use chrono::{DateTime, Duration};
use oref_core::config::{CgmGuardStyle, FlatCgmRule, Profile};
use oref_core::mocks::{ConstantCarbRatio, FixedRateRounder};
use oref_core::reason::ReasonEvent;
use oref_core::{
    CurrentTemp, CycleInputs, DecisionEngine, DecisionError, GlucoseStatus, IobData, IobTick, Settings,
    determine_basal,
};
use oref_traits::Timestamp;
use rstest::rstest;

fn now() -> Timestamp {
    DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap()
}

fn inputs(status: GlucoseStatus) -> CycleInputs {
    CycleInputs::builder(now())
        .glucose(status)
        .iob(IobData::flat(0.0, 0.0, 48))
        .build()
        .unwrap()
}

fn roomy_profile() -> Settings {
    Settings {
        profile: Profile {
            max_basal: 5.0,
            max_daily_basal: 2.0,
            max_daily_safety_multiplier: 5.0,
            current_basal_safety_multiplier: 5.0,
            ..Profile::default()
        },
        ..Settings::default()
    }
}

#[rstest]
fn high_glucose_raises_temp_to_required_rate() {
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let rec = determine_basal(&roomy_profile(), &inputs(g));
    assert!(!rec.is_error(), "{:?}", rec.error);
    assert_eq!(rec.rate, Some(4.2));
    assert_eq!(rec.duration, Some(30.0));
    assert_eq!(rec.eventual_bg, Some(180.0));
    assert!(rec.reason.render().contains("Eventual BG 180 >= 100"));
}

#[rstest]
fn high_glucose_is_capped_by_max_safe_basal() {
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let rec = determine_basal(&Settings::default(), &inputs(g));
    assert_eq!(rec.rate, Some(3.0));
    assert!(rec.reason.contains(|e| matches!(e, ReasonEvent::AdjustedToMaxSafe { .. })));
}

#[rstest]
fn falling_low_suspends_insulin() {
    let g = GlucoseStatus::flat(now(), 60.0).with_deltas(-3.0, -3.0, -3.0);
    let rec = determine_basal(&Settings::default(), &inputs(g));
    assert_eq!(rec.rate, Some(0.0));
    assert_eq!(rec.duration, Some(60.0));
    assert!(rec.reason.render().contains("minGuardBG"));
    assert_eq!(rec.manual_bolus_error, 2);
    assert_eq!(rec.tick, "-3");
}

#[rstest]
fn stale_glucose_skips_predictions() {
    let g = GlucoseStatus::flat(now() - Duration::minutes(20), 120.0).with_deltas(1.0, 1.0, 1.0);
    let rec = determine_basal(&Settings::default(), &inputs(g));
    assert_eq!(rec.rate, None);
    assert!(rec.pred_bgs.iob.is_empty());
    assert!(rec.reason.render().contains("BG data is too old"));
}

#[rstest]
#[case(CgmGuardStyle::Neutral, Some(1.0))]
#[case(CgmGuardStyle::Cancel, Some(0.0))]
fn guard_replaces_high_temp(#[case] style: CgmGuardStyle, #[case] expected: Option<f64>) {
    let mut settings = Settings::default();
    settings.guards.cgm_guard_style = style;
    let g = GlucoseStatus::flat(now() - Duration::minutes(20), 120.0);
    let mut i = inputs(g);
    i.current_temp = CurrentTemp {
        rate: 2.5,
        duration: 20.0,
    };
    let rec = determine_basal(&settings, &i);
    assert_eq!(rec.rate, expected);
}

#[rstest]
fn zero_deltas_trip_the_unchanged_guard() {
    let g = GlucoseStatus::flat(now(), 120.0);
    let rec = determine_basal(&Settings::default(), &inputs(g));
    assert!(rec.reason.render().starts_with("CGM data is unchanged"));
}

#[rstest]
#[case(None, true)]
#[case(Some("fakecgm"), false)]
fn zero_delta_rule_spares_simulated_cgm(#[case] device: Option<&str>, #[case] trips: bool) {
    let mut settings = Settings::default();
    settings.guards.flat_cgm_rule = FlatCgmRule::ZeroDelta;
    let mut g = GlucoseStatus::flat(now(), 120.0).with_deltas(0.0, 0.5, -0.5);
    g.device = device.map(str::to_string);
    let rec = determine_basal(&settings, &inputs(g));
    assert_eq!(rec.reason.render().starts_with("CGM data is unchanged"), trips);
}

#[rstest]
fn missing_iob_ends_the_cycle_with_an_error() {
    let g = GlucoseStatus::flat(now(), 120.0).with_deltas(1.0, 1.0, 1.0);
    let mut i = inputs(g);
    i.iob.ticks.clear();
    let rec = determine_basal(&Settings::default(), &i);
    assert_eq!(rec.error, Some(DecisionError::MissingIob));
    assert!(!rec.has_action());
}

#[rstest]
fn incomplete_iob_tick_is_reported() {
    let g = GlucoseStatus::flat(now(), 120.0).with_deltas(1.0, 1.0, 1.0);
    let mut i = inputs(g);
    i.iob.ticks[3] = IobTick {
        zero_temp_activity: None,
        ..IobTick::new(0.0, 0.0, 0.0)
    };
    let rec = determine_basal(&Settings::default(), &i);
    assert_eq!(rec.error, Some(DecisionError::MissingIobField("zero_temp_activity")));
}

#[rstest]
fn negative_basal_is_an_invalid_profile() {
    let mut settings = Settings::default();
    settings.profile.current_basal = -1.0;
    let g = GlucoseStatus::flat(now(), 120.0).with_deltas(1.0, 1.0, 1.0);
    let rec = determine_basal(&settings, &inputs(g));
    assert!(matches!(rec.error, Some(DecisionError::InvalidProfile(_))));
}

#[rstest]
fn in_range_glucose_needs_no_temp() {
    let mut settings = Settings::default();
    settings.profile.min_bg = 90.0;
    settings.profile.max_bg = 130.0;
    let g = GlucoseStatus::flat(now(), 110.0).with_deltas(0.0, 0.1, 0.1);
    let rec = determine_basal(&settings, &inputs(g));
    assert!(rec.reason.render().contains("in range: no temp required"));
    // neutral temp at scheduled basal
    assert_eq!(rec.rate, Some(1.0));
}

#[rstest]
fn engine_uses_injected_collaborators() {
    let engine = DecisionEngine::builder()
        .settings(roomy_profile())
        .rounder(FixedRateRounder(0.5))
        .carb_ratios(ConstantCarbRatio(None))
        .try_build()
        .unwrap();
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let rec = engine.determine(&inputs(g));
    // 1 + 2 * 1.6 = 4.2, on a 0.5 U/hr grid
    assert_eq!(rec.rate, Some(4.0));
    // lookup miss falls back to the profile ratio
    assert_eq!(rec.cr, Some(10.0));
}

#[rstest]
fn micro_bolus_is_sized_when_enabled() {
    let mut settings = roomy_profile();
    settings.smb.enable_always = true;
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let mut i = inputs(g);
    i.micro_bolus_allowed = true;
    let rec = determine_basal(&settings, &i);
    let units = rec.units.unwrap_or(0.0);
    assert!(units > 0.0 && units <= 1.6, "units {units}");
}

#[rstest]
fn dynamic_isf_stands_down_without_history() {
    let mut settings = roomy_profile();
    settings.dynamic_isf.enabled = true;
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let rec = determine_basal(&settings, &inputs(g));
    let reason = rec.reason.render();
    assert!(reason.contains("Dynamic ISF: Off (not enough pump history)"), "{reason}");
    assert!(reason.contains("TDD: Not enough pumpData"));
    assert_eq!(rec.rate, Some(4.2));
}

#[rstest]
fn record_serializes_with_wire_names() {
    let g = GlucoseStatus::flat(now(), 180.0).with_deltas(0.0, 0.1, 0.1);
    let rec = determine_basal(&roomy_profile(), &inputs(g));
    let v = serde_json::to_value(&rec).unwrap();
    assert_eq!(v["eventualBG"], 180.0);
    assert!(v["predBGs"]["IOB"].is_array());
    assert!(v["reason"].as_str().unwrap().contains("TDD"));
    assert_eq!(v["displayUnits"], "mg/dL");
}
