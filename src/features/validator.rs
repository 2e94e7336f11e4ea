//! Final gate before inference: every required feature present and numeric.

use crate::error::FeatureValidationError;
use crate::features::transformer::{median, FeatureFrame, RecordIds, REQUIRED_FEATURES};
use tracing::{debug, warn};

/// A record dropped from the batch before scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedRecord {
    pub row_index: usize,
    pub reason: String,
}

/// Dense feature matrix in required-feature order, with no missing cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedFeatures {
    pub ids: Vec<RecordIds>,
    pub names: Vec<String>,
    pub rows: Vec<Vec<f32>>,
    /// Records removed because they carry no identifier
    pub excluded: Vec<ExcludedRecord>,
}

impl ValidatedFeatures {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Checks a feature frame against the required feature set.
#[derive(Debug, Clone)]
pub struct FeatureSetValidator {
    required: Vec<String>,
    synthesize_row_ids: bool,
}

impl Default for FeatureSetValidator {
    fn default() -> Self {
        Self::new(REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect(), true)
    }
}

impl FeatureSetValidator {
    /// `synthesize_row_ids` controls what happens to records with neither a
    /// customer id nor a unique id: they get a `row_` id or are excluded.
    pub fn new(required: Vec<String>, synthesize_row_ids: bool) -> Self {
        Self {
            required,
            synthesize_row_ids,
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Required features absent from the frame, in required order.
    pub fn missing(&self, frame: &FeatureFrame) -> Vec<String> {
        self.required
            .iter()
            .filter(|name| frame.column(name).is_none())
            .cloned()
            .collect()
    }

    /// Validate and complete a frame.
    ///
    /// Fails when any required feature is absent. Remaining null or
    /// non-finite cells are re-imputed with the column median over the kept
    /// rows (0 when the column has no usable value).
    pub fn validate(&self, frame: &FeatureFrame) -> Result<ValidatedFeatures, FeatureValidationError> {
        self.validate_batch(frame, None)
    }

    /// [`validate`](Self::validate) for rows stored under `batch_id`.
    /// Synthesized ids become `row_<batch_id>_<index>` so anonymous rows of
    /// different batches never share a dedup key.
    pub fn validate_batch(
        &self,
        frame: &FeatureFrame,
        batch_id: Option<&str>,
    ) -> Result<ValidatedFeatures, FeatureValidationError> {
        let missing = self.missing(frame);
        if !missing.is_empty() {
            warn!(missing = ?missing, "Required features missing");
            return Err(FeatureValidationError { missing });
        }

        let mut ids = Vec::with_capacity(frame.len());
        let mut kept = Vec::with_capacity(frame.len());
        let mut excluded = Vec::new();

        for (row, record_ids) in frame.ids().iter().enumerate() {
            if record_ids.has_identifier() {
                ids.push(record_ids.clone());
                kept.push(row);
            } else if self.synthesize_row_ids {
                ids.push(RecordIds {
                    customer_id: Some(synthetic_id(batch_id, record_ids.row_index)),
                    ..record_ids.clone()
                });
                kept.push(row);
            } else {
                warn!(row = record_ids.row_index, "Record has no identifier, excluding");
                excluded.push(ExcludedRecord {
                    row_index: record_ids.row_index,
                    reason: "no customer identifier".to_string(),
                });
            }
        }

        let mut rows = vec![Vec::with_capacity(self.required.len()); kept.len()];
        for name in &self.required {
            let column = frame.column(name).unwrap_or_default();
            let cells: Vec<Option<f32>> = kept
                .iter()
                .map(|&row| column.get(row).copied().flatten().filter(|v| v.is_finite()))
                .collect();

            let nulls = cells.iter().filter(|c| c.is_none()).count();
            let fill = if nulls > 0 {
                let fill = median(cells.iter().flatten().map(|&v| f64::from(v))).unwrap_or(0.0) as f32;
                debug!(feature = %name, nulls, fill, "Re-imputing feature");
                fill
            } else {
                0.0
            };

            for (out, cell) in rows.iter_mut().zip(cells) {
                out.push(cell.unwrap_or(fill));
            }
        }

        Ok(ValidatedFeatures {
            ids,
            names: self.required.clone(),
            rows,
            excluded,
        })
    }
}

fn synthetic_id(batch_id: Option<&str>, row_index: usize) -> String {
    match batch_id {
        Some(batch) => format!("row_{batch}_{row_index}"),
        None => format!("row_{row_index}"),
    }
}
