//! Income Estimation Pipeline Library
//!
//! Batch scoring of customer records with a frozen gradient-boosted income
//! model: feature engineering, inference with a static confidence interval,
//! business labels and an incrementally maintained prediction store.

pub mod business;
pub mod config;
pub mod error;
pub mod features;
pub mod input;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use features::{FeatureSetValidator, FeatureTransformer, FrequencyEncoder};
pub use models::inference::InferenceEngine;
pub use pipeline::{new_batch_id, BatchSummary, IncomeService, ScoredBatch};
pub use store::PredictionStore;
pub use types::{CustomerRecord, PredictionRecord};
