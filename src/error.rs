// Error taxonomy for the engine.
//
// Perception and device failures are plain enums; the orchestrator turns
// every recoverable one into a retry or an exit code, so only calibration
// and device breakage ever leave `run_combat_cycle` as an `Err`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("correspondence quad is degenerate: {0}")]
    DegenerateQuad(&'static str),
    #[error("homography system is singular")]
    Singular,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("screen capture failed: {0}")]
    Capture(String),
    #[error("input injection failed: {0}")]
    Input(String),
    #[error("template {0} is not loaded")]
    MissingTemplate(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PerceptionError {
    #[error("perspective model has not been calibrated")]
    NotCalibrated,
    #[error("grid shape did not stabilize after {attempts} detections")]
    GeometryUnstable { attempts: usize },
    #[error("map could not be read: {reason}")]
    MapUnreadable { reason: String },
    #[error("vision backend failed: {0}")]
    Vision(String),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl PerceptionError {
    pub fn unreadable(reason: impl Into<String>) -> Self {
        PerceptionError::MapUnreadable { reason: reason.into() }
    }
}

impl From<opencv::Error> for PerceptionError {
    fn from(err: opencv::Error) -> Self {
        PerceptionError::Vision(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid map id {0:?}, expected <world>-<stage>")]
    MapId(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures that abort a combat cycle instead of producing an exit code.
#[derive(Debug, Error)]
pub enum CombatError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Perception(PerceptionError),
}

impl From<PerceptionError> for CombatError {
    fn from(err: PerceptionError) -> Self {
        match err {
            PerceptionError::Calibration(e) => CombatError::Calibration(e),
            PerceptionError::Device(e) => CombatError::Device(e),
            other => CombatError::Perception(other),
        }
    }
}
