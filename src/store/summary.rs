//! Structured JSON view of the master dataset

use crate::types::prediction::{PredictionRecord, PREDICTION_DATE_FORMAT};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterSummary {
    pub dataset_metadata: DatasetMetadata,
    pub business_summary: BusinessSummary,
    /// Per-record summaries inside the recent window
    pub recent_predictions_30days: Vec<RecentPrediction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub last_updated: String,
    pub total_predictions: usize,
    pub unique_customers: usize,
    pub date_range: DateRange,
    pub recent_window_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessSummary {
    pub income_segments: BTreeMap<String, usize>,
    pub business_priorities: BTreeMap<String, usize>,
    pub confidence_levels: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPrediction {
    pub identificador_unico: String,
    pub predicted_income: f64,
    pub income_segment: String,
    pub business_priority: String,
    pub prediction_date: String,
    pub batch_id: String,
}

impl MasterSummary {
    /// Summarize the live set as of `now`.
    pub fn build(records: &[PredictionRecord], now: NaiveDateTime, window_days: i64) -> Self {
        let fmt = |d: NaiveDateTime| d.format(PREDICTION_DATE_FORMAT).to_string();
        let unique: HashSet<&str> = records.iter().map(PredictionRecord::identifier).collect();

        let mut business = BusinessSummary::default();
        for r in records {
            *business.income_segments.entry(r.income_segment.clone()).or_default() += 1;
            *business
                .business_priorities
                .entry(r.business_priority.clone())
                .or_default() += 1;
            *business
                .confidence_levels
                .entry(r.confidence_category.clone())
                .or_default() += 1;
        }

        let cutoff = now - Duration::days(window_days);
        let recent = records
            .iter()
            .filter(|r| r.prediction_date >= cutoff)
            .map(|r| RecentPrediction {
                identificador_unico: r.identifier().to_string(),
                predicted_income: r.predicted_income,
                income_segment: r.income_segment.clone(),
                business_priority: r.business_priority.clone(),
                prediction_date: fmt(r.prediction_date),
                batch_id: r.batch_id.clone(),
            })
            .collect();

        Self {
            dataset_metadata: DatasetMetadata {
                last_updated: fmt(now),
                total_predictions: records.len(),
                unique_customers: unique.len(),
                date_range: DateRange {
                    earliest: records.iter().map(|r| r.prediction_date).min().map(fmt),
                    latest: records.iter().map(|r| r.prediction_date).max().map(fmt),
                },
                recent_window_days: window_days,
            },
            business_summary: business,
            recent_predictions_30days: recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::prediction::prediction_date_format::parse;
    use crate::types::prediction::tests::sample;

    #[test]
    fn test_summary_counts_and_window() {
        let records = vec![
            sample("U1", "2025-03-01 10:00:00", 1500.0),
            sample("U1", "2025-01-01 10:00:00", 1400.0),
            sample("U2", "2025-02-20 10:00:00", 900.0),
        ];
        let now = parse("2025-03-05 00:00:00").unwrap();
        let summary = MasterSummary::build(&records, now, 30);

        let meta = &summary.dataset_metadata;
        assert_eq!(meta.total_predictions, 3);
        assert_eq!(meta.unique_customers, 2);
        assert_eq!(meta.date_range.earliest.as_deref(), Some("2025-01-01 10:00:00"));
        assert_eq!(meta.date_range.latest.as_deref(), Some("2025-03-01 10:00:00"));
        assert_eq!(summary.business_summary.income_segments["MIDDLE_INCOME_STABLE"], 3);
        assert_eq!(summary.recent_predictions_30days.len(), 2);
    }

    #[test]
    fn test_empty_dataset() {
        let now = parse("2025-03-05 00:00:00").unwrap();
        let summary = MasterSummary::build(&[], now, 30);
        assert_eq!(summary.dataset_metadata.total_predictions, 0);
        assert_eq!(summary.dataset_metadata.date_range.earliest, None);
        assert!(summary.business_summary.income_segments.is_empty());
    }
}
