//! Standard scaler: `(x - mean) / scale` per feature

use crate::error::ModelArtifactError;
use serde::{Deserialize, Serialize};

/// Per-feature standardization fitted at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    #[serde(alias = "mean_")]
    pub mean: Vec<f64>,
    #[serde(alias = "scale_", alias = "std")]
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Self {
        Self { mean, scale }
    }

    pub fn feature_count(&self) -> usize {
        self.mean.len()
    }

    /// Check internal consistency and the expected width.
    pub fn check(&self, expected: usize) -> Result<(), ModelArtifactError> {
        if self.scale.len() != self.mean.len() {
            return Err(ModelArtifactError::ScalerShape {
                expected: self.mean.len(),
                actual: self.scale.len(),
            });
        }
        if self.mean.len() != expected {
            return Err(ModelArtifactError::ScalerShape {
                expected,
                actual: self.mean.len(),
            });
        }
        Ok(())
    }

    /// Scale rows in place. A zero scale leaves the centered value unscaled.
    pub fn transform(&self, rows: &mut [Vec<f32>]) -> Result<(), ModelArtifactError> {
        for row in rows.iter_mut() {
            if row.len() != self.mean.len() {
                return Err(ModelArtifactError::ScalerShape {
                    expected: self.mean.len(),
                    actual: row.len(),
                });
            }
            for ((x, mean), scale) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                *x = ((f64::from(*x) - mean) / scale) as f32;
            }
        }
        Ok(())
    }
}
