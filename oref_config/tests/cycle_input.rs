use oref_config::{PumpEventDto, load_cycle_input_json, load_pump_history_json};

#[test]
fn parses_full_cycle_input() {
    let json = r#"{
        "now": "2025-01-26T12:00:00+01:00",
        "glucose": [
            {"date": "2025-01-26T12:00:00+01:00", "sgv": 180, "device": "g6"},
            {"date": "2025-01-26T11:55:00+01:00", "glucose": 180, "device": "g6"}
        ],
        "iob": {
            "ticks": [{"iob": 0.0, "activity": 0.0, "zero_temp_activity": 0.0}],
            "last_temp": {"date": "2025-01-26T11:40:00+01:00", "rate": 1.0, "duration": 30},
            "bolus_iob": 0.0
        },
        "meal": {"carbs": 0, "mealCOB": 0},
        "current_temp": {"rate": 0, "duration": 0},
        "pump_history": [
            {"_type": "TempBasalDuration", "timestamp": "2025-01-26T11:40:00+01:00", "duration (min)": 30},
            {"_type": "TempBasal", "timestamp": "2025-01-26T11:40:00+01:00", "rate": 1.0, "temp": "absolute"},
            {"_type": "Bolus", "timestamp": "2025-01-26T08:00:00+01:00", "amount": 2.5}
        ],
        "micro_bolus_allowed": true
    }"#;
    let input = load_cycle_input_json(json).expect("parse cycle input");
    assert_eq!(input.glucose.len(), 2);
    assert_eq!(input.glucose[0].glucose, Some(180.0));
    assert_eq!(input.iob.ticks.len(), 1);
    assert!((input.autosens_ratio - 1.0).abs() < 1e-9);
    assert!(input.micro_bolus_allowed);
    assert_eq!(input.pump_history.len(), 3);
    assert!(matches!(
        input.pump_history[0],
        PumpEventDto::TempBasalDuration { duration, .. } if (duration - 30.0).abs() < 1e-9
    ));
}

#[test]
fn missing_tick_fields_survive_parsing() {
    let json = r#"{
        "glucose": [{"date": "2025-01-26T12:00:00+01:00", "sgv": 120}],
        "iob": {"ticks": [{"iob": 0.5}]}
    }"#;
    let input = load_cycle_input_json(json).expect("parse cycle input");
    assert_eq!(input.iob.ticks[0].activity, None);
}

#[test]
fn unknown_pump_events_are_kept_as_other() {
    let json = r#"[
        {"_type": "BatteryChange", "timestamp": "2025-01-26T12:00:00+01:00", "level": 3},
        {"_type": "PumpSuspend", "timestamp": "2025-01-26T11:00:00+01:00"}
    ]"#;
    let events = load_pump_history_json(json).expect("parse pump history");
    assert!(matches!(events[0], PumpEventDto::Other));
    assert!(matches!(events[1], PumpEventDto::PumpSuspend { .. }));
}

#[test]
fn malformed_json_is_reported() {
    let err = load_cycle_input_json("{ not json").unwrap_err();
    assert!(format!("{err}").contains("parse cycle input JSON"));
}
