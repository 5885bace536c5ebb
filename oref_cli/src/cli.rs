//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "oref", version, about = "Closed-loop temp basal decision CLI")]
pub struct Cli {
    /// Path to the profile and settings TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/oref.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to [logging].level, then info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize a CGM window into deltas, noise and flat-sensor state
    Glucose {
        /// Readings file: CSV (date,glucose,device,type) or a JSON array
        #[arg(long, value_name = "FILE")]
        readings: PathBuf,
    },
    /// Reconstruct the last day's insulin from a pump history JSON file
    Tdd {
        /// Pump history JSON (newest first, `_type` tagged)
        #[arg(long, value_name = "FILE")]
        history: PathBuf,
        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },
    /// Run one decision cycle and print the temp basal recommendation
    Decide {
        /// Cycle input JSON (glucose, iob, meal, current_temp, pump_history, ...)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
    },
    /// Load and validate the config, then exit
    SelfCheck,
}
