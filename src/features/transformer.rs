//! Feature engineering: raw customer records to the model's feature frame.
//!
//! Matches the preprocessing done in the training pipeline. Features are
//! produced under the exact names the model artifact declares, and every step
//! tolerates missing inputs so that one bad row never aborts a batch.

use crate::features::encoder::{Category, FrequencyEncoder};
use crate::types::customer::CustomerRecord;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::debug;

/// Features the model consumes, in model order.
pub const REQUIRED_FEATURES: [&str; 10] = [
    OCCUPATION_FREQ,
    EMPLOYER_FREQ,
    AGE,
    EMPLOYMENT_DAYS,
    JOB_TITLE_FREQ,
    ACCOUNT_DAYS,
    BALANCE_TO_PAYMENT_RATIO,
    PROFESSIONAL_STABILITY_SCORE,
    BALANCE,
    EMPLOYMENT_YEARS,
];

pub const OCCUPATION_FREQ: &str = "ocupacion_consolidated_freq";
pub const EMPLOYER_FREQ: &str = "nombreempleadorcliente_consolidated_freq";
pub const JOB_TITLE_FREQ: &str = "cargoempleocliente_consolidated_freq";
pub const AGE: &str = "edad";
pub const BALANCE: &str = "saldo";
pub const EMPLOYMENT_DAYS: &str = "fechaingresoempleo_days";
pub const ACCOUNT_DAYS: &str = "fecha_inicio_days";
pub const LOAN_MATURITY_DAYS: &str = "fecha_vencimiento_days";
pub const BALANCE_TO_PAYMENT_RATIO: &str = "balance_to_payment_ratio";
pub const PROFESSIONAL_STABILITY_SCORE: &str = "professional_stability_score";
pub const EMPLOYMENT_YEARS: &str = "employment_years";

/// Day counts used when a whole date column is unusable.
pub const DEFAULT_EMPLOYMENT_DAYS: f64 = 1000.0;
pub const DEFAULT_ACCOUNT_DAYS: f64 = 1000.0;
pub const DEFAULT_LOAN_MATURITY_DAYS: f64 = 365.0;

/// Identifier columns carried alongside the features.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordIds {
    pub row_index: usize,
    pub customer_id: Option<String>,
    pub unique_id: Option<String>,
}

impl RecordIds {
    pub fn has_identifier(&self) -> bool {
        self.customer_id.is_some() || self.unique_id.is_some()
    }
}

impl From<&CustomerRecord> for RecordIds {
    fn from(record: &CustomerRecord) -> Self {
        Self {
            row_index: record.row_index,
            customer_id: record.customer_id.clone(),
            unique_id: record.unique_id.clone(),
        }
    }
}

/// Column-oriented batch of named features. Cells may still be null until
/// validation completes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    ids: Vec<RecordIds>,
    names: Vec<String>,
    columns: Vec<Vec<Option<f32>>>,
}

impl FeatureFrame {
    pub fn new(ids: Vec<RecordIds>) -> Self {
        Self {
            ids,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[RecordIds] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f32>]> {
        self.position(name).map(|i| self.columns[i].as_slice())
    }

    /// Insert or replace a column. Panics if the length does not match the frame.
    pub fn insert(&mut self, name: &str, values: Vec<Option<f32>>) {
        assert_eq!(values.len(), self.ids.len(), "column {name} has wrong length");
        match self.position(name) {
            Some(i) => self.columns[i] = values,
            None => {
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<Option<f32>>> {
        let i = self.position(name)?;
        self.names.remove(i);
        Some(self.columns.remove(i))
    }

    /// Value of `name` for row `row`.
    pub fn value(&self, row: usize, name: &str) -> Option<f32> {
        self.column(name).and_then(|c| c.get(row).copied().flatten())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Transforms customer records into the model's feature frame.
pub struct FeatureTransformer {
    encoder: Arc<FrequencyEncoder>,
}

impl FeatureTransformer {
    /// Create a transformer sharing read-only frequency mappings.
    pub fn new(encoder: Arc<FrequencyEncoder>) -> Self {
        Self { encoder }
    }

    /// Feature names the model expects, in order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &REQUIRED_FEATURES
    }

    /// Number of features produced for the model.
    pub fn feature_count(&self) -> usize {
        REQUIRED_FEATURES.len()
    }

    /// Transform a batch. Deterministic for a fixed reference date and mapping.
    ///
    /// Batch-level statistics (median imputation) are computed over the
    /// records passed in, so the same record may score differently in a
    /// different batch.
    pub fn transform(&self, records: &[CustomerRecord], reference: NaiveDate) -> FeatureFrame {
        let mut frame = FeatureFrame::new(records.iter().map(RecordIds::from).collect());

        // Temporal features
        let days_since = |d: Option<NaiveDate>| d.map(|d| (reference - d).num_days() as f64);
        let days_until = |d: Option<NaiveDate>| d.map(|d| (d - reference).num_days() as f64);

        let employment_days = impute_median(
            records.iter().map(|r| days_since(r.employment_start)).collect(),
            DEFAULT_EMPLOYMENT_DAYS,
        );
        let account_days = impute_median(
            records.iter().map(|r| days_since(r.account_start)).collect(),
            DEFAULT_ACCOUNT_DAYS,
        );
        let maturity_days = impute_median(
            records.iter().map(|r| days_until(r.loan_maturity)).collect(),
            DEFAULT_LOAN_MATURITY_DAYS,
        );

        // Frequency features
        let encode = |category: Category, pick: fn(&CustomerRecord) -> Option<&str>| -> Vec<f64> {
            records
                .iter()
                .map(|r| self.encoder.encode(category, pick(r)))
                .collect()
        };
        let occupation_freq = encode(Category::Occupation, |r| r.occupation.as_deref());
        let employer_freq = encode(Category::Employer, |r| r.employer.as_deref());
        let job_title_freq = encode(Category::JobTitle, |r| r.job_title.as_deref());

        // Derived ratios
        let balance_ratio: Vec<Option<f64>> = records
            .iter()
            .map(|r| balance_to_payment_ratio(r.balance, r.monthly_payment))
            .collect();
        let employment_years: Vec<f64> = employment_days.iter().map(|&d| employment_years(d)).collect();
        let stability: Vec<f64> = (0..records.len())
            .map(|i| {
                professional_stability_score(
                    Some(employment_years[i]),
                    Some(employer_freq[i]),
                    Some(occupation_freq[i]),
                )
            })
            .collect();

        fn present(v: &[f64]) -> Vec<Option<f64>> {
            v.iter().map(|&x| Some(x)).collect()
        }
        let mut columns: Vec<(&str, Vec<Option<f64>>)> = vec![
            (OCCUPATION_FREQ, present(&occupation_freq)),
            (EMPLOYER_FREQ, present(&employer_freq)),
            (AGE, records.iter().map(|r| r.age.map(f64::from)).collect()),
            (EMPLOYMENT_DAYS, present(&employment_days)),
            (JOB_TITLE_FREQ, present(&job_title_freq)),
            (ACCOUNT_DAYS, present(&account_days)),
            (BALANCE_TO_PAYMENT_RATIO, balance_ratio),
            (PROFESSIONAL_STABILITY_SCORE, present(&stability)),
            (BALANCE, records.iter().map(|r| r.balance).collect()),
            (EMPLOYMENT_YEARS, present(&employment_years)),
            (LOAN_MATURITY_DAYS, present(&maturity_days)),
        ];

        // Missing-value backstop
        for (name, values) in columns.iter_mut() {
            let nulls = values.iter().filter(|v| v.is_none()).count();
            if nulls > 0 {
                let fill = median(values.iter().flatten().copied()).unwrap_or(0.0);
                debug!(feature = *name, nulls, fill, "Filling missing values with median");
                for v in values.iter_mut().filter(|v| v.is_none()) {
                    *v = Some(fill);
                }
            }
        }

        // Narrow to f32
        for (name, values) in columns {
            frame.insert(name, values.into_iter().map(|v| v.map(|x| x as f32)).collect());
        }

        debug!(rows = frame.len(), features = frame.names().len(), "Feature frame built");
        frame
    }
}

/// `balance / payment` clipped to [0, 100]; 0 when the payment is missing or
/// not positive, null when only the balance is missing.
pub fn balance_to_payment_ratio(balance: Option<f64>, payment: Option<f64>) -> Option<f64> {
    match payment {
        Some(p) if p > 0.0 => balance.map(|b| (b / p).clamp(0.0, 100.0)),
        _ => Some(0.0),
    }
}

/// Employment tenure in years clipped to [0, 50].
pub fn employment_years(employment_days: f64) -> f64 {
    (employment_days / 365.25).clamp(0.0, 50.0)
}

/// Mean of the computable sub-scores (tenure/10, employer/100, occupation/100,
/// each clipped to [0, 1]); 0.5 when none is computable.
pub fn professional_stability_score(
    employment_years: Option<f64>,
    employer_freq: Option<f64>,
    occupation_freq: Option<f64>,
) -> f64 {
    let components: Vec<f64> = [
        employment_years.map(|y| y / 10.0),
        employer_freq.map(|f| f / 100.0),
        occupation_freq.map(|f| f / 100.0),
    ]
    .into_iter()
    .flatten()
    .filter(|v| v.is_finite())
    .map(|v| v.clamp(0.0, 1.0))
    .collect();

    if components.is_empty() {
        0.5
    } else {
        components.iter().sum::<f64>() / components.len() as f64
    }
}

/// Fill nulls with the median of the present values, or `fallback` when the
/// whole column is null.
fn impute_median(values: Vec<Option<f64>>, fallback: f64) -> Vec<f64> {
    let fill = median(values.iter().flatten().copied()).unwrap_or(fallback);
    values.into_iter().map(|v| v.unwrap_or(fill)).collect()
}

/// Median of finite values; mean of the two middle values for even counts.
pub fn median<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let mut sorted: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
