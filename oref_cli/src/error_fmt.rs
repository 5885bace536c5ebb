//! Human-readable error descriptions and structured JSON error formatting.

use oref_core::error::{BuildError, DecisionError};
use thiserror::Error;

/// Failures the CLI itself classifies before they reach the user.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("decision failed: {0}")]
    Decision(DecisionError),
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingProfile => {
                "What happened: No settings were provided to the decision engine.\nLikely causes: The config was not loaded or not passed to the builder.\nHow to fix: Ensure the TOML loads and is handed over via settings(...).".to_string()
            }
            BuildError::MissingGlucose => {
                "What happened: No glucose status was available for this cycle.\nLikely causes: The readings were empty or every value was zero or missing.\nHow to fix: Check the `glucose` array in the cycle input.".to_string()
            }
            BuildError::MissingIob => {
                "What happened: No IOB data was provided.\nLikely causes: The `iob` object is missing from the cycle input.\nHow to fix: Provide the IOB model output (`iob.ticks`).".to_string()
            }
            BuildError::InvalidInput(msg) => format!(
                "What happened: Invalid input ({msg}).\nLikely causes: Out-of-range values in the cycle input or conflicting settings.\nHow to fix: Correct the value named above, then rerun."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CliError>() {
        return match ce {
            CliError::Config(msg) => format!(
                "What happened: Configuration is invalid ({msg}).\nLikely causes: Missing [profile] values or out-of-range settings in the TOML.\nHow to fix: Edit the config file and run `oref self-check`."
            ),
            CliError::Input(msg) if msg.to_ascii_lowercase().contains("readings csv must have headers") => {
                "Invalid headers in readings CSV. Expected 'date,glucose,device,type'.".to_string()
            }
            CliError::Input(msg) => format!(
                "What happened: Could not read the input ({msg}).\nLikely causes: Wrong path, malformed JSON, or unexpected CSV headers.\nHow to fix: Check the file against the documented format and try again."
            ),
            CliError::Decision(de) => decision_hint(de),
        };
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn decision_hint(de: &DecisionError) -> String {
    match de {
        DecisionError::MissingTarget => {
            "What happened: No glucose target could be determined.\nLikely causes: profile.min_bg or profile.max_bg is missing or zero.\nHow to fix: Set both targets in [profile].".to_string()
        }
        DecisionError::MissingIob | DecisionError::MissingIobField(_) => format!(
            "What happened: {}\nLikely causes: The IOB model output is empty or a tick lacks a field.\nHow to fix: Provide iob, activity and zero_temp_activity on every tick.",
            de.to_string().trim_end()
        ),
        DecisionError::EventualBgNan { .. } => format!(
            "What happened: {de}.\nLikely causes: Non-finite sensitivity or deviation.\nHow to fix: Check profile.sens and the autosens ratio."
        ),
        DecisionError::InvalidProfile(_) => format!(
            "What happened: {}\nLikely causes: Negative or non-finite basal or ISF in the profile.\nHow to fix: Correct [profile] and rerun `oref self-check`.",
            de.to_string().trim_end()
        ),
    }
}

/// Stable exit codes: config 3, input 4, decision 5, anything else 1.
/// Usage errors exit with 2 from clap before any of this runs.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 4;
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::Config(_)) => 3,
        Some(CliError::Input(_)) => 4,
        Some(CliError::Decision(_)) => 5,
        None => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "BuildError";
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::Config(_)) => "InvalidConfig",
        Some(CliError::Input(_)) => "InvalidInput",
        Some(CliError::Decision(_)) => "DecisionError",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "reason": reason_name(err),
        "code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_exit_three() {
        let err = eyre::Report::new(CliError::Config("profile.sens must be > 0".into()));
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("profile.sens must be > 0"));
    }

    #[test]
    fn build_errors_are_explained() {
        let err = eyre::Report::new(BuildError::MissingIob);
        assert_eq!(exit_code_for_error(&err), 4);
        assert!(humanize(&err).starts_with("What happened: No IOB data"));
    }

    #[test]
    fn json_error_carries_reason_and_code() {
        let err = eyre::Report::new(CliError::Decision(DecisionError::MissingTarget));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "DecisionError");
        assert_eq!(v["code"], 5);
    }

    #[test]
    fn unknown_errors_fall_back_to_generic_text() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).contains("Original: boom"));
    }
}
