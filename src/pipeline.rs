//! Batch orchestration: raw table to persisted predictions.
//!
//! [`IncomeService`] owns everything that is loaded once per process
//! (frequency mappings, model artifact, configuration) and runs batches
//! through parse, transform, validate, infer, classify and store.

use crate::business;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::features::encoder::{FrequencyEncoder, FrequencyMappings};
use crate::features::transformer::{FeatureTransformer, RecordIds, REQUIRED_FEATURES};
use crate::features::validator::{ExcludedRecord, FeatureSetValidator};
use crate::input::{read_table, RawTable};
use crate::metrics::PipelineMetrics;
use crate::models::inference::{Estimate, InferenceEngine};
use crate::store::{CommitReport, PredictionStore};
use crate::types::customer::{CustomerRecord, FieldWarning};
use crate::types::prediction::{round2, PredictionRecord};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Predictions for one batch, not yet stored.
#[derive(Debug, Clone, Default)]
pub struct ScoredBatch {
    pub submitted: usize,
    pub predictions: Vec<PredictionRecord>,
    pub excluded: Vec<ExcludedRecord>,
    pub warnings: Vec<FieldWarning>,
}

/// Report returned to the caller after a batch is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub submitted: usize,
    pub succeeded: usize,
    pub excluded: usize,
    pub field_warnings: usize,
    pub average_income: Option<f64>,
    pub min_income: Option<f64>,
    pub max_income: Option<f64>,
    /// Stored records archived because this batch replaced them
    pub replaced: usize,
    /// Stored records archived by the retention sweep
    pub expired: usize,
    pub live_total: usize,
    pub unique_customers: usize,
    pub income_segments: BTreeMap<String, usize>,
    pub business_priorities: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

/// `batch_<YYYYMMDD_HHMMSS>_<8 hex>`
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Process-wide context for scoring batches.
pub struct IncomeService {
    config: AppConfig,
    transformer: FeatureTransformer,
    validator: FeatureSetValidator,
    engine: InferenceEngine,
    metrics: Arc<PipelineMetrics>,
}

impl IncomeService {
    /// Load mappings and the model artifact named in `config`.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let mappings = FrequencyMappings::load(&config.models.frequency_mappings_path)
            .context("Failed to load frequency mappings")?;
        let engine = InferenceEngine::from_config(&config.models).with_context(|| {
            format!(
                "Failed to load model artifact {}",
                config.models.artifact_path.display()
            )
        })?;
        Ok(Self::new(config, mappings, engine))
    }

    pub fn new(config: AppConfig, mappings: FrequencyMappings, engine: InferenceEngine) -> Self {
        let encoder = Arc::new(FrequencyEncoder::new(mappings));
        let validator = FeatureSetValidator::new(
            REQUIRED_FEATURES.iter().map(|s| s.to_string()).collect(),
            config.features.synthesize_row_ids,
        );
        Self {
            transformer: FeatureTransformer::new(encoder),
            validator,
            engine,
            config,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Share an external metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Reference date for temporal features: the configured date, else today.
    pub fn reference_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.config
            .features
            .reference_date
            .unwrap_or_else(|| now.date_naive())
    }

    /// Score already-parsed records.
    pub fn score_records(
        &self,
        records: &[CustomerRecord],
        now: DateTime<Utc>,
    ) -> Result<ScoredBatch, PipelineError> {
        self.score_for_batch(records, now, None)
    }

    /// Parse and score a raw table.
    pub fn score_table(&self, table: &RawTable, now: DateTime<Utc>) -> Result<ScoredBatch, PipelineError> {
        self.score_table_for_batch(table, now, None)
    }

    fn score_table_for_batch(
        &self,
        table: &RawTable,
        now: DateTime<Utc>,
        batch_id: Option<&str>,
    ) -> Result<ScoredBatch, PipelineError> {
        let parsed = CustomerRecord::parse_table(table);
        for warning in &parsed.warnings {
            self.metrics.record_warning(warning.field);
        }
        let mut scored = self.score_for_batch(&parsed.records, now, batch_id)?;
        scored.warnings = parsed.warnings;
        Ok(scored)
    }

    fn score_for_batch(
        &self,
        records: &[CustomerRecord],
        now: DateTime<Utc>,
        batch_id: Option<&str>,
    ) -> Result<ScoredBatch, PipelineError> {
        let frame = self.transformer.transform(records, self.reference_date(now));
        let validated = self.validator.validate_batch(&frame, batch_id)?;
        let estimates = self.engine.predict(&validated)?;

        let prediction_date = now.naive_utc().with_nanosecond(0).unwrap_or(now.naive_utc());
        let predictions = validated
            .ids
            .iter()
            .zip(&estimates)
            .map(|(ids, estimate)| self.to_record(ids, estimate, prediction_date))
            .collect::<Vec<_>>();

        self.metrics
            .record_scoring(records.len(), predictions.len(), validated.excluded.len());
        for p in &predictions {
            self.metrics.record_segment(&p.income_segment);
        }

        Ok(ScoredBatch {
            submitted: records.len(),
            predictions,
            excluded: validated.excluded,
            warnings: Vec::new(),
        })
    }

    /// Read, parse and score an input file.
    pub fn score_file<P: AsRef<Path>>(&self, path: P, now: DateTime<Utc>) -> Result<ScoredBatch, PipelineError> {
        let table = read_table(path)?;
        self.score_table(&table, now)
    }

    pub fn run_batch(
        &self,
        store: &mut PredictionStore,
        table: &RawTable,
        batch_id: &str,
    ) -> Result<BatchSummary, PipelineError> {
        self.run_batch_at(store, table, batch_id, Utc::now())
    }

    /// Score a table, add it to the store, sweep expired records and save.
    pub fn run_batch_at(
        &self,
        store: &mut PredictionStore,
        table: &RawTable,
        batch_id: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchSummary, PipelineError> {
        let started = Instant::now();
        let result = self.run_batch_inner(store, table, batch_id, now, started);
        if let Err(e) = &result {
            warn!(batch_id, error = %e, "Batch failed");
            self.metrics.record_failure();
        }
        result
    }

    fn run_batch_inner(
        &self,
        store: &mut PredictionStore,
        table: &RawTable,
        batch_id: &str,
        now: DateTime<Utc>,
        started: Instant,
    ) -> Result<BatchSummary, PipelineError> {
        let scored = self.score_table_for_batch(table, now, Some(batch_id))?;
        let incomes: Vec<f64> = scored.predictions.iter().map(|p| p.predicted_income).collect();
        let mut income_segments = BTreeMap::new();
        let mut business_priorities = BTreeMap::new();
        for p in &scored.predictions {
            *income_segments.entry(p.income_segment.clone()).or_insert(0) += 1;
            *business_priorities.entry(p.business_priority.clone()).or_insert(0) += 1;
        }

        let CommitReport { added, swept } = store.commit_batch_at(
            scored.predictions,
            batch_id,
            self.config.store.retention_days,
            now,
        )?;

        let duration = started.elapsed();
        self.metrics.record_batch(duration, added.replaced, swept.expired);

        let summary = BatchSummary {
            batch_id: batch_id.to_string(),
            submitted: scored.submitted,
            succeeded: incomes.len(),
            excluded: scored.excluded.len(),
            field_warnings: scored.warnings.len(),
            average_income: (!incomes.is_empty())
                .then(|| round2(incomes.iter().sum::<f64>() / incomes.len() as f64)),
            min_income: incomes.iter().copied().reduce(f64::min),
            max_income: incomes.iter().copied().reduce(f64::max),
            replaced: added.replaced,
            expired: swept.expired,
            live_total: store.len(),
            unique_customers: store.unique_customers(),
            income_segments,
            business_priorities,
            duration_ms: duration.as_millis() as u64,
        };

        info!(
            batch_id,
            submitted = summary.submitted,
            succeeded = summary.succeeded,
            excluded = summary.excluded,
            replaced = summary.replaced,
            expired = summary.expired,
            live_total = summary.live_total,
            duration_ms = summary.duration_ms,
            "Batch complete"
        );
        Ok(summary)
    }

    fn to_record(
        &self,
        ids: &RecordIds,
        estimate: &Estimate,
        prediction_date: chrono::NaiveDateTime,
    ) -> PredictionRecord {
        let ci_width = estimate.ci_width();
        let labels = business::classify(estimate.predicted_income, ci_width);
        PredictionRecord {
            unique_id: ids.unique_id.clone(),
            customer_id: ids.customer_id.clone(),
            predicted_income: estimate.predicted_income,
            income_lower_90: estimate.lower,
            income_upper_90: estimate.upper,
            income_segment: labels.segment.as_str().to_string(),
            confidence_category: labels.confidence.as_str().to_string(),
            business_priority: labels.priority.as_str().to_string(),
            recommendation: labels.recommendation().to_string(),
            confidence_level: self.engine.confidence_level(),
            ci_width,
            prediction_date,
            model_version: self.engine.model_version().to_string(),
            batch_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::artifact::ModelArtifact;
    use crate::store::MASTER_JSON;
    use chrono::TimeZone;
    use serde_json::json;

    /// Single-split model: 1400 + 300 when balance >= 4000
    fn service(synthesize_row_ids: bool) -> IncomeService {
        let value = json!({
            "model": {
                "base_score": 1400.0,
                "trees": [{"nodeid": 0, "split": "saldo", "split_condition": 4000.0, "yes": 1, "no": 2,
                           "children": [{"nodeid": 1, "leaf": 0.0}, {"nodeid": 2, "leaf": 300.0}]}]
            },
            "feature_names": REQUIRED_FEATURES
        });
        let mut config = AppConfig::default();
        config.features.synthesize_row_ids = synthesize_row_ids;
        config.features.reference_date = NaiveDate::from_ymd_opt(2025, 1, 1);
        let engine =
            InferenceEngine::new(ModelArtifact::from_value(&value).unwrap(), &config.models).unwrap();
        IncomeService::new(config, FrequencyMappings::fallback(), engine)
    }

    fn table(rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            ["cliente", "edad", "ocupacion", "saldo", "monto_letra", "fechaingresoempleo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 30, 15).unwrap()
    }

    #[test]
    fn test_batch_id_format() {
        let id = new_batch_id(now());
        assert!(id.starts_with("batch_20250301_103015_"));
        assert_eq!(id.len(), "batch_20250301_103015_".len() + 8);
    }

    #[test]
    fn test_score_table() {
        let svc = service(true);
        let scored = svc
            .score_table(
                &table(&[&["C1", "35", "INGENIERO", "5000", "250", "15/01/2020"]]),
                now(),
            )
            .unwrap();

        let p = &scored.predictions[0];
        assert_eq!(p.customer_id.as_deref(), Some("C1"));
        assert_eq!(p.predicted_income, 1700.0);
        assert_eq!(p.income_lower_90, 1189.07);
        assert_eq!(p.income_upper_90, 2455.02);
        assert_eq!(p.income_segment, "MIDDLE_INCOME_GROWTH");
        assert_eq!(p.confidence_category, "MEDIUM_CONFIDENCE");
        assert_eq!(p.business_priority, "REVIEW_REQUIRED");
        assert_eq!(p.model_version, "XGBoost_v1.0_Final");
        assert_eq!(p.prediction_date, now().naive_utc());
    }

    #[test]
    fn test_missing_ids_are_excluded_when_not_synthesized() {
        let rows: &[&[&str]] = &[&["C1", "35", "", "100", "10", ""], &["", "40", "", "9000", "10", ""]];
        let scored = service(false).score_table(&table(rows), now()).unwrap();
        assert_eq!(scored.predictions.len(), 1);
        assert_eq!(scored.excluded.len(), 1);

        let scored = service(true).score_table(&table(rows), now()).unwrap();
        assert_eq!(scored.predictions.len(), 2);
        assert_eq!(scored.predictions[1].customer_id.as_deref(), Some("row_1"));
    }

    #[test]
    fn test_run_batch_persists_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(true);
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();

        let summary = svc
            .run_batch_at(
                &mut store,
                &table(&[
                    &["C1", "35", "INGENIERO", "5000", "250", "15/01/2020"],
                    &["C2", "28", "VENDEDOR", "1000", "100", "01/06/2022"],
                ]),
                "batch_test",
                now(),
            )
            .unwrap();

        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.min_income, Some(1400.0));
        assert_eq!(summary.max_income, Some(1700.0));
        assert_eq!(summary.average_income, Some(1550.0));
        assert_eq!(summary.live_total, 2);
        assert_eq!(summary.income_segments["MIDDLE_INCOME_STABLE"], 1);
        assert!(store.master_csv_path().exists());
        assert!(store.records().iter().all(|r| r.batch_id == "batch_test"));
    }

    #[test]
    fn test_failed_save_leaves_no_trace_of_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(true);
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        std::fs::create_dir_all(dir.path().join(MASTER_JSON).join("blocker")).unwrap();

        let err = svc
            .run_batch_at(
                &mut store,
                &table(&[&["FAILED", "35", "INGENIERO", "5000", "250", "15/01/2020"]]),
                "b_fail",
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
        assert!(store.is_empty());

        std::fs::remove_dir_all(dir.path().join(MASTER_JSON)).unwrap();
        svc.run_batch_at(
            &mut store,
            &table(&[&["OTHER", "40", "CONTADOR", "1000", "100", "01/06/2022"]]),
            "b_ok",
            now(),
        )
        .unwrap();
        drop(store);

        let reopened = PredictionStore::open(dir.path(), 30).unwrap();
        let ids: Vec<&str> = reopened.records().iter().map(|r| r.identifier()).collect();
        assert_eq!(ids, vec!["OTHER"]);
    }

    #[test]
    fn test_anonymous_rows_in_later_chunks_keep_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(true);
        let mut store = PredictionStore::open(dir.path(), 30).unwrap();
        let rows: Vec<Vec<String>> = (0..1500)
            .map(|i| vec![String::new(), "30".to_string(), String::new(), (100 * i).to_string()])
            .collect();
        let input = RawTable::new(
            ["cliente", "edad", "ocupacion", "saldo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rows,
        );

        for (i, chunk) in input.chunks(1000).iter().enumerate() {
            svc.run_batch_at(&mut store, chunk, &format!("chunk_{i}"), now())
                .unwrap();
        }

        assert_eq!(store.len(), 1500);
        assert!(store.archive_files().unwrap().is_empty());
        let history = store.customer_history("row_chunk_1_1200");
        assert_eq!(history.len(), 1);
    }
}
