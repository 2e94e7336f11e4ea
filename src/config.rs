//! Configuration management for the income prediction pipeline

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use config::{Config, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Path to the frozen model bundle (JSON, or `.onnx` with the `onnx` feature)
    pub artifact_path: PathBuf,
    /// Path to the training-time frequency mappings (JSON)
    pub frequency_mappings_path: PathBuf,
    /// Version tag stamped on every prediction, unless the artifact carries one
    #[serde(default = "default_model_version")]
    pub model_version: String,
    /// Lower CI offset used when the artifact does not carry one
    #[serde(default = "default_ci_lower_offset")]
    pub ci_lower_offset: f64,
    /// Upper CI offset used when the artifact does not carry one
    #[serde(default = "default_ci_upper_offset")]
    pub ci_upper_offset: f64,
    /// Nominal coverage of the confidence interval
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

fn default_model_version() -> String {
    "XGBoost_v1.0_Final".to_string()
}

fn default_ci_lower_offset() -> f64 {
    -510.93
}

fn default_ci_upper_offset() -> f64 {
    755.02
}

fn default_confidence_level() -> f64 {
    0.90
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("models/income_model.json"),
            frequency_mappings_path: PathBuf::from("models/frequency_mappings.json"),
            model_version: default_model_version(),
            ci_lower_offset: default_ci_lower_offset(),
            ci_upper_offset: default_ci_upper_offset(),
            confidence_level: default_confidence_level(),
        }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FeaturesConfig {
    /// Fixed reference date for temporal features; wall-clock date when unset
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    /// Substitute `row_<index>` when a record carries no identifier
    #[serde(default = "default_true")]
    pub synthesize_row_ids: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            reference_date: None,
            synthesize_row_ids: true,
        }
    }
}

/// Prediction store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the master dataset and its archive folder
    pub data_dir: PathBuf,
    /// Live-set retention window in days
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Window of per-record summaries included in the JSON view
    #[serde(default = "default_recent_window_days")]
    pub recent_window_days: i64,
}

/// Upper bound on any day window (100 years).
pub const MAX_WINDOW_DAYS: i64 = 36_500;

fn default_retention_days() -> i64 {
    90
}

fn default_recent_window_days() -> i64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("model_pred_files"),
            retention_days: default_retention_days(),
            recent_window_days: default_recent_window_days(),
        }
    }
}

/// Batch runner configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum rows scored per batch; larger inputs are split
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, days) in [
            ("store.retention_days", self.store.retention_days),
            ("store.recent_window_days", self.store.recent_window_days),
        ] {
            if !(0..=MAX_WINDOW_DAYS).contains(&days) {
                bail!("{name} must be between 0 and {MAX_WINDOW_DAYS}, got {days}");
            }
        }
        if self.pipeline.max_batch_size == 0 {
            bail!("pipeline.max_batch_size must be at least 1");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            models: ModelsConfig::default(),
            features: FeaturesConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.models.ci_lower_offset, -510.93);
        assert_eq!(config.models.ci_upper_offset, 755.02);
        assert_eq!(config.models.confidence_level, 0.90);
        assert_eq!(config.store.retention_days, 90);
        assert_eq!(config.store.recent_window_days, 30);
        assert_eq!(config.pipeline.max_batch_size, 1000);
        assert!(config.features.synthesize_row_ids);
        assert!(config.features.reference_date.is_none());
    }

    #[test]
    fn test_load_from_toml_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[models]
artifact_path = "artifacts/model.json"
frequency_mappings_path = "artifacts/freq.json"
model_version = "gbm_v2"

[features]
reference_date = "2025-01-01"

[store]
data_dir = "/tmp/preds"
retention_days = 30
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.models.model_version, "gbm_v2");
        assert_eq!(config.models.ci_upper_offset, 755.02);
        assert_eq!(
            config.features.reference_date,
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
        assert!(config.features.synthesize_row_ids);
        assert_eq!(config.store.retention_days, 30);
        assert_eq!(config.store.recent_window_days, 30);
        assert_eq!(config.pipeline.max_batch_size, 1000);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_out_of_range_windows_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
data_dir = "/tmp/preds"
retention_days = 9223372036854775807
"#
        )
        .unwrap();
        let err = AppConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.to_string().contains("store.retention_days"));

        let mut config = AppConfig::default();
        config.store.recent_window_days = -1;
        assert!(config.validate().is_err());
        config.store.recent_window_days = 30;
        config.pipeline.max_batch_size = 0;
        assert!(config.validate().is_err());
        assert!(AppConfig::default().validate().is_ok());
    }
}
