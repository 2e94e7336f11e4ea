//! Scored customer records and the master dataset row schema

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Timestamp layout used in the master dataset.
pub const PREDICTION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fixed column order of the master CSV.
pub const MASTER_COLUMNS: [&str; 14] = [
    "identificador_unico",
    "cliente",
    "predicted_income",
    "income_lower_90",
    "income_upper_90",
    "income_segment",
    "confidence_category",
    "business_priority",
    "recommendation",
    "confidence_level",
    "ci_width",
    "prediction_date",
    "model_version",
    "batch_id",
];

/// One scored customer. Never mutated once stored; corrections archive the
/// old record and insert a newer one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(rename = "identificador_unico", default)]
    pub unique_id: Option<String>,
    #[serde(rename = "cliente", default)]
    pub customer_id: Option<String>,
    pub predicted_income: f64,
    pub income_lower_90: f64,
    pub income_upper_90: f64,
    #[serde(default)]
    pub income_segment: String,
    #[serde(default)]
    pub confidence_category: String,
    #[serde(default)]
    pub business_priority: String,
    #[serde(default)]
    pub recommendation: String,
    pub confidence_level: f64,
    pub ci_width: f64,
    #[serde(with = "prediction_date_format")]
    pub prediction_date: NaiveDateTime,
    pub model_version: String,
    #[serde(default)]
    pub batch_id: String,
}

impl PredictionRecord {
    /// Deduplication key: identifier plus calendar date of the prediction.
    pub fn dedup_key(&self) -> (String, NaiveDate) {
        (self.identifier().to_string(), self.prediction_date.date())
    }

    /// Storage identifier: unique id, falling back to customer id.
    pub fn identifier(&self) -> &str {
        self.unique_id
            .as_deref()
            .or(self.customer_id.as_deref())
            .unwrap_or_default()
    }

    /// Cell values in [`MASTER_COLUMNS`] order.
    pub fn csv_fields(&self) -> Vec<String> {
        vec![
            self.unique_id.clone().unwrap_or_default(),
            self.customer_id.clone().unwrap_or_default(),
            format_amount(self.predicted_income),
            format_amount(self.income_lower_90),
            format_amount(self.income_upper_90),
            self.income_segment.clone(),
            self.confidence_category.clone(),
            self.business_priority.clone(),
            self.recommendation.clone(),
            self.confidence_level.to_string(),
            format_amount(self.ci_width),
            self.prediction_date.format(PREDICTION_DATE_FORMAT).to_string(),
            self.model_version.clone(),
            self.batch_id.clone(),
        ]
    }
}

fn format_amount(value: f64) -> String {
    format!("{:.2}", value)
}

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serde adapter for `YYYY-MM-DD HH:MM:SS`, also accepting ISO `T` separators
/// and fractional seconds on input.
pub mod prediction_date_format {
    use super::PREDICTION_DATE_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(PREDICTION_DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid prediction_date '{raw}'")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        NaiveDateTime::parse_from_str(raw, PREDICTION_DATE_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
    }
}
