//! Subcommand bodies. Results go to stdout; logs and errors go to stderr.

use std::fs;
use std::path::Path;

use eyre::WrapErr;
use oref_core::{
    BuildError, DecisionEngine, GlucoseReading, GlucoseStatus, PumpEvent, Settings,
    TempBasalRequest, analyze, cycle_inputs, total_daily_dose,
};
use oref_traits::{Clock, SystemClock, Timestamp};

use crate::error_fmt::CliError;

fn read_text(path: &Path) -> eyre::Result<String> {
    fs::read_to_string(path).map_err(|e| CliError::Input(format!("read {}: {e}", path.display())).into())
}

fn load_readings(path: &Path) -> eyre::Result<Vec<GlucoseReading>> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let parsed = if is_csv {
        oref_config::load_readings_csv(path)
    } else {
        oref_config::load_readings_json(&read_text(path)?)
    };
    let rows = parsed.map_err(|e| CliError::Input(e.to_string()))?;
    Ok(rows.iter().map(GlucoseReading::from).collect())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> eyre::Result<()> {
    let s = serde_json::to_string(value).wrap_err("serialize output")?;
    println!("{s}");
    Ok(())
}

pub fn run_glucose(path: &Path, json: bool) -> eyre::Result<()> {
    let readings = load_readings(path)?;
    let Some(status) = analyze(&readings) else {
        return Err(BuildError::MissingGlucose.into());
    };
    tracing::info!(
        glucose = status.glucose,
        delta = status.delta,
        flat_minutes = status.cgm_flat_minutes,
        "glucose status"
    );
    if json {
        return print_json(&status);
    }
    print_status(&status);
    Ok(())
}

fn print_status(s: &GlucoseStatus) {
    println!("BG {} at {}", s.glucose, s.date.to_rfc3339());
    println!(
        "delta {:+.1}  short avg {:+.1}  long avg {:+.1}",
        s.delta, s.short_avg_delta, s.long_avg_delta
    );
    println!("noise {}  flat for {:.0} min", s.noise, s.cgm_flat_minutes);
}

pub fn run_tdd(settings: &Settings, path: &Path, at: Option<&str>, json: bool) -> eyre::Result<()> {
    let history = oref_config::load_pump_history_json(&read_text(path)?)
        .map_err(|e| CliError::Input(e.to_string()))?;
    let events: Vec<PumpEvent> = history.iter().map(PumpEvent::from).collect();
    let now = match at {
        Some(s) => Timestamp::parse_from_rfc3339(s)
            .map_err(|e| CliError::Input(format!("--at {s}: {e}")))?,
        None => SystemClock::new().now(),
    };

    let tdd = total_daily_dose(
        &events,
        &settings.profile.basal_schedule,
        now,
        settings.profile.bolus_increment,
    );
    tracing::info!(total = tdd.total, hours = tdd.pump_hours, "tdd");

    if json {
        let mut v = serde_json::to_value(tdd).wrap_err("serialize tdd")?;
        if let Some(obj) = v.as_object_mut() {
            obj.insert("hours".into(), tdd.pump_hours.into());
            obj.insert("enough_history".into(), tdd.enough_history().into());
        }
        return print_json(&v);
    }
    println!(
        "TDD {:.2} U over {:.1} h (bolus {}%, basal {}%)",
        tdd.total,
        tdd.pump_hours,
        tdd.bolus_percent(),
        tdd.basal_percent()
    );
    println!(
        "bolus {:.2} U  temp basal {:.2} U  scheduled basal {:.2} U",
        tdd.bolus, tdd.temp_basal, tdd.scheduled_basal
    );
    if !tdd.enough_history() {
        println!("history is too short for TDD-based dosing");
    }
    Ok(())
}

pub fn run_decide(settings: Settings, path: &Path, json: bool) -> eyre::Result<()> {
    let input = oref_config::load_cycle_input_json(&read_text(path)?)
        .map_err(|e| CliError::Input(e.to_string()))?;
    let now = input.now.unwrap_or_else(|| SystemClock::new().now());

    let mut readings: Vec<GlucoseReading> = input.glucose.iter().map(GlucoseReading::from).collect();
    readings.sort_by(|a, b| b.date.cmp(&a.date));
    let Some(status) = analyze(&readings) else {
        return Err(BuildError::MissingGlucose.into());
    };

    let inputs = cycle_inputs(&input, now, status)?;
    let engine = DecisionEngine::builder().settings(settings).try_build()?;
    let rec = engine.determine(&inputs);

    if json {
        print_json(&rec)?;
    } else {
        print_decision(&rec);
    }
    match rec.error {
        Some(err) => Err(CliError::Decision(err).into()),
        None => Ok(()),
    }
}

fn print_decision(rec: &TempBasalRequest) {
    match (rec.rate, rec.duration) {
        (Some(rate), Some(duration)) => println!("temp basal {rate:.2} U/hr for {duration:.0} min"),
        _ => println!("no temp basal change"),
    }
    if let Some(units) = rec.units {
        println!("micro-bolus {units:.2} U");
    }
    if let Some(eventual) = rec.eventual_bg {
        println!("eventual BG {eventual:.0}  IOB {:.2} U  COB {:.0} g", rec.iob, rec.cob);
    }
    println!("reason: {}", rec.reason.render());
}
