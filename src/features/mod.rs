//! Column normalization, categorical encoding and feature engineering

pub mod columns;
pub mod encoder;
pub mod transformer;
pub mod validator;

pub use encoder::{Category, FrequencyEncoder, FrequencyMappings};
pub use transformer::{FeatureFrame, FeatureTransformer, RecordIds, REQUIRED_FEATURES};
pub use validator::{ExcludedRecord, FeatureSetValidator, ValidatedFeatures};
