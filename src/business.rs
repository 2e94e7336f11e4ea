//! Business labels derived from a prediction and its interval width.
//!
//! Pure lookups over threshold tables; adding a segment means adding a row,
//! not a branch.

use serde::{Deserialize, Serialize};

/// Income band of a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomeSegment {
    LowIncomeHighRisk,
    LowIncomeStable,
    MiddleIncomeStable,
    MiddleIncomeGrowth,
    HighIncomeStable,
    HighIncomePremium,
}

/// How much the interval can be trusted for this income level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceCategory {
    HighConfidence,
    MediumConfidence,
    LowerConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessPriority {
    PremiumPriority,
    HighPriority,
    StandardPriority,
    ReviewRequired,
}

/// Upper bounds (exclusive) on predicted income, in ascending order.
const SEGMENT_TABLE: [(f64, IncomeSegment); 5] = [
    (500.0, IncomeSegment::LowIncomeHighRisk),
    (1000.0, IncomeSegment::LowIncomeStable),
    (1500.0, IncomeSegment::MiddleIncomeStable),
    (2000.0, IncomeSegment::MiddleIncomeGrowth),
    (3000.0, IncomeSegment::HighIncomeStable),
];

/// ((income bound, interval width bound), category); both bounds exclusive.
const CONFIDENCE_TABLE: [((f64, f64), ConfidenceCategory); 2] = [
    ((1500.0, 1200.0), ConfidenceCategory::HighConfidence),
    ((2000.0, 1400.0), ConfidenceCategory::MediumConfidence),
];

/// Product priority per segment, for high-confidence predictions.
const PRIORITY_TABLE: [(IncomeSegment, BusinessPriority); 6] = [
    (IncomeSegment::LowIncomeHighRisk, BusinessPriority::StandardPriority),
    (IncomeSegment::LowIncomeStable, BusinessPriority::StandardPriority),
    (IncomeSegment::MiddleIncomeStable, BusinessPriority::HighPriority),
    (IncomeSegment::MiddleIncomeGrowth, BusinessPriority::HighPriority),
    (IncomeSegment::HighIncomeStable, BusinessPriority::PremiumPriority),
    (IncomeSegment::HighIncomePremium, BusinessPriority::PremiumPriority),
];

/// Label of the first row whose key satisfies `matches`, else `default`.
pub fn first_match<K, L: Copy>(table: &[(K, L)], matches: impl Fn(&K) -> bool, default: L) -> L {
    table
        .iter()
        .find(|(key, _)| matches(key))
        .map(|(_, label)| *label)
        .unwrap_or(default)
}

impl IncomeSegment {
    pub fn from_income(income: f64) -> Self {
        first_match(&SEGMENT_TABLE, |bound| income < *bound, IncomeSegment::HighIncomePremium)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeSegment::LowIncomeHighRisk => "LOW_INCOME_HIGH_RISK",
            IncomeSegment::LowIncomeStable => "LOW_INCOME_STABLE",
            IncomeSegment::MiddleIncomeStable => "MIDDLE_INCOME_STABLE",
            IncomeSegment::MiddleIncomeGrowth => "MIDDLE_INCOME_GROWTH",
            IncomeSegment::HighIncomeStable => "HIGH_INCOME_STABLE",
            IncomeSegment::HighIncomePremium => "HIGH_INCOME_PREMIUM",
        }
    }
}

impl ConfidenceCategory {
    pub fn from_interval(income: f64, ci_width: f64) -> Self {
        first_match(
            &CONFIDENCE_TABLE,
            |(max_income, max_width)| income < *max_income && ci_width < *max_width,
            ConfidenceCategory::LowerConfidence,
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceCategory::HighConfidence => "HIGH_CONFIDENCE",
            ConfidenceCategory::MediumConfidence => "MEDIUM_CONFIDENCE",
            ConfidenceCategory::LowerConfidence => "LOWER_CONFIDENCE",
        }
    }
}

impl BusinessPriority {
    /// Only high-confidence predictions get a product priority; everything
    /// else goes to manual review.
    pub fn from_labels(segment: IncomeSegment, confidence: ConfidenceCategory) -> Self {
        if confidence != ConfidenceCategory::HighConfidence {
            return BusinessPriority::ReviewRequired;
        }
        first_match(&PRIORITY_TABLE, |s| *s == segment, BusinessPriority::ReviewRequired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessPriority::PremiumPriority => "PREMIUM_PRIORITY",
            BusinessPriority::HighPriority => "HIGH_PRIORITY",
            BusinessPriority::StandardPriority => "STANDARD_PRIORITY",
            BusinessPriority::ReviewRequired => "REVIEW_REQUIRED",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            BusinessPriority::PremiumPriority => "Offer premium products and personalized services",
            BusinessPriority::HighPriority => "Target for standard loan products and credit increases",
            BusinessPriority::StandardPriority => "Monitor and offer basic financial products",
            BusinessPriority::ReviewRequired => "Requires manual review before product offers",
        }
    }
}

/// All labels attached to one prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessLabels {
    pub segment: IncomeSegment,
    pub confidence: ConfidenceCategory,
    pub priority: BusinessPriority,
}

impl BusinessLabels {
    pub fn recommendation(&self) -> &'static str {
        self.priority.recommendation()
    }
}

/// Classify a prediction. Deterministic; no side effects.
pub fn classify(predicted_income: f64, ci_width: f64) -> BusinessLabels {
    let segment = IncomeSegment::from_income(predicted_income);
    let confidence = ConfidenceCategory::from_interval(predicted_income, ci_width);
    BusinessLabels {
        segment,
        confidence,
        priority: BusinessPriority::from_labels(segment, confidence),
    }
}
