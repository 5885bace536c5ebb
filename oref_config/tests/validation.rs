use oref_config::{CgmGuardStyle, FlatCgmRule, GlucoseUnits, InsulinCurve, load_toml};
use rstest::rstest;

const MINIMAL: &str = r#"
[profile]
current_basal = 1.0
max_basal = 3.0
max_iob = 4.0
sens = 50.0
carb_ratio = 10.0
min_bg = 100.0
max_bg = 110.0
"#;

#[test]
fn minimal_profile_uses_defaults() {
    let cfg = load_toml(MINIMAL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");

    assert_eq!(cfg.profile.units, GlucoseUnits::MgDl);
    assert!((cfg.profile.autosens_min - 0.7).abs() < 1e-9);
    assert!((cfg.profile.autosens_max - 1.2).abs() < 1e-9);
    assert!((cfg.profile.bolus_increment - 0.1).abs() < 1e-9);
    assert!((cfg.profile.max_carb_absorption_rate - 30.0).abs() < 1e-9);
    assert!((cfg.targets.half_basal_exercise_target - 160.0).abs() < 1e-9);
    assert!(cfg.targets.sensitivity_raises_target);
    assert_eq!(cfg.smb.max_smb_basal_minutes, Some(30.0));
    assert_eq!(cfg.dynamic_isf.curve, InsulinCurve::RapidActing);
    assert_eq!(cfg.guards.cgm_guard_style, CgmGuardStyle::Neutral);
    assert_eq!(cfg.guards.flat_cgm_rule, FlatCgmRule::Duration);
    assert!(!cfg.overrides.enabled);
}

#[test]
fn schedules_accept_clock_strings_and_minutes() {
    let toml = format!(
        "{MINIMAL}{}",
        r#"
basal_schedule = [
    { start = "00:00", rate = 0.8 },
    { start = "06:30:00", rate = 1.2 },
    { start = 1200, rate = 0.9 },
]

[profile.carb_ratios]
units = "exchanges"
schedule = [{ start = "00:00", ratio = 12.0 }]
"#
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("valid schedule");
    let starts: Vec<u32> = cfg.profile.basal_schedule.iter().map(|b| b.start).collect();
    assert_eq!(starts, vec![0, 390, 1200]);
    assert_eq!(
        cfg.profile.carb_ratios.as_ref().map(|c| c.units),
        Some(oref_config::CarbUnits::Exchanges)
    );
}

#[test]
fn rejects_invalid_clock_string() {
    let toml = format!(
        "{MINIMAL}{}",
        r#"
basal_schedule = [{ start = "25:00", rate = 0.8 }]
"#
    );
    let err = load_toml(&toml).expect_err("hour 25 must not parse");
    assert!(format!("{err}").contains("invalid time of day"));
}

#[test]
fn variant_knobs_parse() {
    let toml = format!(
        "{MINIMAL}{}",
        r#"
[guards]
cgm_guard_style = "cancel"
flat_cgm_rule = "zero_delta"

[dynamic_isf]
enabled = true
curve = "ultra-rapid"
"#
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    assert_eq!(cfg.guards.cgm_guard_style, CgmGuardStyle::Cancel);
    assert_eq!(cfg.guards.flat_cgm_rule, FlatCgmRule::ZeroDelta);
    assert_eq!(cfg.dynamic_isf.curve, InsulinCurve::UltraRapid);
}

#[rstest]
#[case("sens = 50.0", "sens = 0.0", "profile.sens must be > 0")]
#[case("max_basal = 3.0", "max_basal = -1.0", "profile.max_basal must be > 0")]
#[case("min_bg = 100.0", "min_bg = 140.0", "profile.min_bg must be <= profile.max_bg")]
#[case("carb_ratio = 10.0", "carb_ratio = 0.0", "profile.carb_ratio must be > 0")]
#[case("max_iob = 4.0", "max_iob = -0.5", "profile.max_iob must be >= 0")]
#[case(
    "max_bg = 110.0",
    "max_bg = 110.0\nmax_carb_absorption_rate = 0.0",
    "profile.max_carb_absorption_rate must be > 0"
)]
fn rejects_bad_profile_values(#[case] from: &str, #[case] to: &str, #[case] needle: &str) {
    let toml = MINIMAL.replace(from, to);
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[rstest]
#[case("[smb]\ndelivery_ratio = 1.5\n", "smb.delivery_ratio must be in [0.0, 1.0]")]
#[case("[autoisf]\nmin = 1.5\nmax = 1.0\n", "autoisf.min must be <= autoisf.max")]
#[case("[targets]\nhalf_basal_exercise_target = 90.0\n", "half_basal_exercise_target must be > 100")]
#[case("[override]\nenabled = true\npercentage = 0.0\n", "override.percentage must be > 0")]
#[case("[dynamic_isf]\nweight_percentage = 2.0\n", "dynamic_isf.weight_percentage must be in [0.0, 1.0]")]
fn rejects_bad_section_values(#[case] extra: &str, #[case] needle: &str) {
    let toml = format!("{MINIMAL}\n{extra}");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "expected '{needle}' in '{err}'"
    );
}

#[test]
fn rejects_schedule_not_starting_at_midnight() {
    let toml = format!(
        "{MINIMAL}{}",
        r#"
basal_schedule = [{ start = "01:00", rate = 0.8 }]
"#
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains("must start at 00:00"));
}

#[test]
fn missing_profile_is_a_parse_error() {
    let err = load_toml("[smb]\nenable_always = true\n").expect_err("profile is required");
    assert!(format!("{err}").contains("profile"));
}
