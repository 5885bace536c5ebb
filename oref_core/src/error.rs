use thiserror::Error;

/// Problems that end a decision cycle without any temp basal action.
///
/// These never escape `determine_basal`; they are written into the
/// decision record's `error` slot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecisionError {
    #[error("Error: could not determine target_bg. ")]
    MissingTarget,
    #[error("Error: iob_data undefined. ")]
    MissingIob,
    #[error("Error: iob_data missing some property ({0}). ")]
    MissingIobField(&'static str),
    #[error("Error: could not calculate eventualBG. Sensitivity: {sens} Deviation: {deviation}")]
    EventualBgNan { sens: f64, deviation: f64 },
    #[error("Error: {0}")]
    InvalidProfile(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing profile")]
    MissingProfile,
    #[error("missing glucose status")]
    MissingGlucose,
    #[error("missing iob data")]
    MissingIob,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
