//! Crate-level error type.
//!
//! Only batch-fatal conditions live here. Per-region numerical failures are
//! reported through [`crate::domain::FitStatus::Failed`] instead and never
//! abort a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::MeasureKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Two series that must share a date axis do not.
    #[error("length mismatch for {context}: expected {expected} values, found {found}")]
    LengthMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    /// A `"<locality>, <code>"` label whose code is not in the configured table.
    #[error("unknown sub-region code `{code}` in label `{label}`")]
    UnknownSubRegionCode { label: String, code: String },

    #[error("duplicate region name `{name}` (coordinates {lat}, {lon})")]
    DuplicateRegion { name: String, lat: f64, lon: f64 },

    #[error("aggregate region `{name}` collides with an existing region or country name")]
    AggregateCollision { name: String },

    #[error("invalid {kind} table: {message}")]
    Schema { kind: MeasureKind, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid calibration request: {0}")]
    CalibrationRequest(String),

    #[error("failed to launch calibrator `{program}`: {source}")]
    CalibratorSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("calibrator exited with {status}: {stderr}")]
    CalibratorExit { status: String, stderr: String },

    #[error("calibrator output is not a calibration result: {0}")]
    CalibratorOutput(String),

    /// The in-process calibration did not reach a usable solution.
    #[error("calibration did not converge: {0}")]
    CalibrationFailed(String),

    #[error("failed to open `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
