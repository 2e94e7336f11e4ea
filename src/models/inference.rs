//! Income inference engine

use crate::config::ModelsConfig;
use crate::error::ModelArtifactError;
use crate::features::validator::ValidatedFeatures;
use crate::models::artifact::ModelArtifact;
use crate::models::scaler::StandardScaler;
use crate::models::Regressor;
use crate::types::prediction::round2;
use tracing::{debug, info};

/// Point prediction with its confidence interval, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub predicted_income: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Estimate {
    pub fn ci_width(&self) -> f64 {
        round2(self.upper - self.lower)
    }
}

/// Runs the frozen model over validated feature matrices.
///
/// Holds the model, optional scaler, expected feature order and the fixed
/// interval offsets. Shared read-only across batches.
pub struct InferenceEngine {
    model: Box<dyn Regressor>,
    scaler: Option<StandardScaler>,
    feature_names: Vec<String>,
    ci_lower_offset: f64,
    ci_upper_offset: f64,
    model_version: String,
    confidence_level: f64,
}

impl InferenceEngine {
    /// Load the artifact named in the configuration.
    pub fn from_config(config: &ModelsConfig) -> Result<Self, ModelArtifactError> {
        let artifact = ModelArtifact::load(&config.artifact_path)?;
        Self::new(artifact, config)
    }

    /// Build an engine from a loaded artifact. Offsets and version carried by
    /// the artifact take precedence over the configured defaults.
    pub fn new(artifact: ModelArtifact, config: &ModelsConfig) -> Result<Self, ModelArtifactError> {
        let lower = artifact.ci_lower_offset.unwrap_or(config.ci_lower_offset);
        let upper = artifact.ci_upper_offset.unwrap_or(config.ci_upper_offset);
        if !(lower <= 0.0 && upper >= 0.0) {
            return Err(ModelArtifactError::InvalidOffsets { lower, upper });
        }

        let model_version = artifact
            .model_version
            .unwrap_or_else(|| config.model_version.clone());

        info!(
            model = artifact.model.name(),
            version = %model_version,
            features = artifact.feature_names.len(),
            ci_lower_offset = lower,
            ci_upper_offset = upper,
            "Inference engine initialized"
        );

        Ok(Self {
            model: artifact.model,
            scaler: artifact.scaler,
            feature_names: artifact.feature_names,
            ci_lower_offset: lower,
            ci_upper_offset: upper,
            model_version,
            confidence_level: config.confidence_level,
        })
    }

    /// Feature names in the order the model consumes them
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// (lower, upper) interval offsets
    pub fn offsets(&self) -> (f64, f64) {
        (self.ci_lower_offset, self.ci_upper_offset)
    }

    /// Predict income for every row.
    ///
    /// The feature set must match the artifact's list exactly (order may
    /// differ; columns are reordered by name). Predictions are floored at 0;
    /// `lower = max(0, p + lower_offset)`, `upper = p + upper_offset`.
    pub fn predict(&self, features: &ValidatedFeatures) -> Result<Vec<Estimate>, ModelArtifactError> {
        let order = self.column_order(&features.names)?;
        if features.is_empty() {
            return Ok(Vec::new());
        }

        let mut matrix: Vec<Vec<f32>> = features
            .rows
            .iter()
            .map(|row| order.iter().map(|&i| row[i]).collect())
            .collect();

        if let Some(scaler) = &self.scaler {
            scaler.transform(&mut matrix)?;
        }

        let raw = self.model.predict(&matrix)?;
        if raw.len() != matrix.len() {
            return Err(ModelArtifactError::OutputShape {
                expected: matrix.len(),
                actual: raw.len(),
            });
        }

        let estimates = raw
            .into_iter()
            .map(|p| {
                if !p.is_finite() {
                    return Err(ModelArtifactError::Runtime(format!("non-finite prediction {p}")));
                }
                Ok(self.interval(p))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(rows = estimates.len(), "Inference complete");
        Ok(estimates)
    }

    /// Interval around a raw model output.
    pub fn interval(&self, raw: f64) -> Estimate {
        let predicted_income = round2(raw.max(0.0));
        Estimate {
            predicted_income,
            lower: round2((predicted_income + self.ci_lower_offset).max(0.0)),
            upper: round2(predicted_income + self.ci_upper_offset),
        }
    }

    /// Position in `given` of each expected feature; fails unless the two
    /// sets are identical.
    fn column_order(&self, given: &[String]) -> Result<Vec<usize>, ModelArtifactError> {
        let missing: Vec<String> = self
            .feature_names
            .iter()
            .filter(|n| !given.contains(n))
            .cloned()
            .collect();
        let unexpected: Vec<String> = given
            .iter()
            .filter(|n| !self.feature_names.contains(n))
            .cloned()
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(ModelArtifactError::FeatureMismatch { missing, unexpected });
        }

        Ok(self
            .feature_names
            .iter()
            .filter_map(|n| given.iter().position(|g| g == n))
            .collect())
    }
}
