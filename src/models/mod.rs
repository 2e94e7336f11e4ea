//! Model artifact loading and income inference

pub mod artifact;
pub mod gbm;
pub mod inference;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod scaler;

use crate::error::ModelArtifactError;

pub use artifact::ModelArtifact;
pub use gbm::GbmRegressor;
pub use inference::{Estimate, InferenceEngine};
pub use scaler::StandardScaler;

/// A fitted regression model: one prediction per feature row.
pub trait Regressor: Send + Sync {
    /// Short model kind used in logs
    fn name(&self) -> &str;

    fn predict(&self, rows: &[Vec<f32>]) -> Result<Vec<f64>, ModelArtifactError>;
}
