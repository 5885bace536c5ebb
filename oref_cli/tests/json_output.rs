use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[profile]
current_basal = 1.0
max_basal = 3.5
max_iob = 4.0
sens = 50.0
carb_ratio = 10.0
min_bg = 100.0
max_bg = 110.0
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_cycle(dir: &tempfile::TempDir, ticks: usize) -> PathBuf {
    let glucose = serde_json::json!([
        { "date": "2025-01-26T12:00:00+00:00", "glucose": 180, "device": "g6" },
        { "date": "2025-01-26T11:55:00+00:00", "glucose": 176, "device": "g6" },
        { "date": "2025-01-26T11:50:00+00:00", "glucose": 172, "device": "g6" },
        { "date": "2025-01-26T11:45:00+00:00", "glucose": 168, "device": "g6" },
    ]);
    let ticks: Vec<serde_json::Value> = (0..ticks)
        .map(|_| serde_json::json!({ "iob": 0.0, "activity": 0.0, "zero_temp_activity": 0.0 }))
        .collect();
    let input = serde_json::json!({
        "now": "2025-01-26T12:00:00+00:00",
        "glucose": glucose,
        "iob": { "ticks": ticks },
    });
    let path = dir.path().join("cycle.json");
    fs::write(&path, input.to_string()).unwrap();
    path
}

fn decide_json(ticks: usize) -> (Option<i32>, serde_json::Value, String) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let input = write_cycle(&dir, ticks);

    let out = Command::cargo_bin("oref_cli")
        .unwrap()
        .arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("decide")
        .arg("--input")
        .arg(&input)
        .output()
        .unwrap();
    let stdout = String::from_utf8(out.stdout).unwrap();
    let line = stdout.lines().last().unwrap_or_default();
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    (out.status.code(), v, String::from_utf8(out.stderr).unwrap())
}

/// Validate the record schema for a successful decision.
#[rstest]
fn decision_record_schema() {
    let (code, v, _) = decide_json(48);
    assert_eq!(code, Some(0));

    for key in ["temp", "deliverAt", "bg", "tick", "eventualBG", "predBGs", "COB", "IOB", "reason"] {
        assert!(v.get(key).is_some(), "missing key {key} in {v}");
    }
    assert_eq!(v["temp"], "absolute");
    assert_eq!(v["bg"], 180.0);
    assert_eq!(v["tick"], "+4");
    assert_eq!(v["displayUnits"], "mg/dL");
    assert!(v["predBGs"]["IOB"].as_array().is_some_and(|a| !a.is_empty()));
    assert!(v["reason"].as_str().is_some_and(|r| r.contains("ISF")));
    assert!(v.get("error").is_none());
}

/// An empty IOB curve still prints the record, then fails with the decision code.
#[rstest]
fn decision_error_prints_record_and_json_error() {
    let (code, v, stderr) = decide_json(0);
    assert_eq!(code, Some(5));
    assert_eq!(v["error"], "Error: iob_data undefined. ");
    assert!(v.get("rate").is_none());

    let err_line = stderr.lines().last().unwrap_or_default();
    let e: serde_json::Value = serde_json::from_str(err_line).unwrap();
    assert_eq!(e["reason"], "DecisionError");
    assert_eq!(e["code"], 5);
}
