//! Error taxonomy for the income prediction pipeline.
//!
//! Structural problems (unreadable input, broken artifact, failed persistence)
//! are errors and propagate to the caller. Field-level problems are not errors;
//! they surface as [`crate::types::customer::FieldWarning`] values.

use std::path::PathBuf;
use thiserror::Error;

/// The input table cannot be read at all.
#[derive(Error, Debug)]
pub enum InputFormatError {
    #[error("failed to open input {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("input {path} has no columns")]
    NoColumns { path: PathBuf },

    #[error("input {path} is not a JSON array of objects")]
    NotATable { path: PathBuf },

    #[error("failed to parse CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to parse JSON input: {0}")]
    Json(#[from] serde_json::Error),
}

/// Required features are missing after transformation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("feature validation failed, missing features: {missing:?}")]
pub struct FeatureValidationError {
    /// Required feature names that are absent from the frame, in contract order.
    pub missing: Vec<String>,
}

/// The model bundle cannot be loaded or used.
#[derive(Error, Debug)]
pub enum ModelArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse artifact: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no value exposing a predict capability found (searched: {searched:?})")]
    NoModel { searched: Vec<String> },

    #[error("invalid tree {tree}: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("artifact does not declare its feature list")]
    MissingFeatureList,

    #[error("feature mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    FeatureMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("scaler expects {expected} features, got {actual}")]
    ScalerShape { expected: usize, actual: usize },

    #[error("confidence offsets must satisfy lower <= 0 <= upper (got {lower}, {upper})")]
    InvalidOffsets { lower: f64, upper: f64 },

    #[error("model expects rows of {expected} features, got {actual}")]
    InputWidth { expected: usize, actual: usize },

    #[error("model returned {actual} predictions for {expected} rows")]
    OutputShape { expected: usize, actual: usize },

    #[error("model runtime error: {0}")]
    Runtime(String),
}

/// The master dataset cannot be read or written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },

    #[error("failed to encode master JSON view: {0}")]
    Json(#[from] serde_json::Error),

    #[error("prediction store {path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("day window {days} is out of range")]
    InvalidWindow { days: i64 },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PersistenceError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Umbrella error returned by the orchestrator.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputFormatError),

    #[error(transparent)]
    Validation(#[from] FeatureValidationError),

    #[error(transparent)]
    Artifact(#[from] ModelArtifactError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
