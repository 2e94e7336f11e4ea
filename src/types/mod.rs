//! Type definitions for the income prediction pipeline

pub mod customer;
pub mod prediction;

pub use customer::{CustomerRecord, FieldWarning, ParsedBatch};
pub use prediction::PredictionRecord;
