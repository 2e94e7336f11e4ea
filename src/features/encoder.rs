//! Frequency encoding for categorical fields.
//!
//! Mappings are learned at training time and loaded read-only. A value never
//! seen during training scores as the rarest known category, never zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Categorical fields that carry a frequency mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Occupation,
    Employer,
    JobTitle,
}

/// Category value -> occurrence count for one categorical field.
pub type FrequencyMapping = HashMap<String, f64>;

/// All training-time mappings, one per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyMappings {
    #[serde(rename = "ocupacion", alias = "occupation", default)]
    pub occupation: FrequencyMapping,
    #[serde(rename = "nombreempleadorcliente", alias = "employer", default)]
    pub employer: FrequencyMapping,
    #[serde(rename = "cargoempleocliente", alias = "job_title", default)]
    pub job_title: FrequencyMapping,
}

impl FrequencyMappings {
    /// Load mappings from JSON. A missing file falls back to the built-in table.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Frequency mappings not found, using fallback table");
            return Ok(Self::fallback());
        }

        let text = std::fs::read_to_string(path)?;
        let raw: FrequencyMappings = serde_json::from_str(&text)?;
        let mappings = raw.normalized();

        info!(
            path = %path.display(),
            occupation = mappings.occupation.len(),
            employer = mappings.employer.len(),
            job_title = mappings.job_title.len(),
            "Frequency mappings loaded"
        );
        Ok(mappings)
    }

    /// Built-in mappings derived from the training extract.
    pub fn fallback() -> Self {
        let employer = [
            ("GOBIERNO DE COSTA RICA", 200.0),
            ("BANCO NACIONAL", 150.0),
            ("ICE", 120.0),
            ("CCSS", 100.0),
            ("MUNICIPALIDAD", 80.0),
            ("TECH COMPANY SA", 60.0),
            ("COMERCIAL LTDA", 40.0),
            ("SERVICIOS SA", 30.0),
            ("INDEPENDIENTE", 15.0),
            ("OTHERS", 1.0),
        ];
        let occupation = [
            ("INGENIERO", 150.0),
            ("CONTADOR", 120.0),
            ("ADMINISTRADOR", 100.0),
            ("VENDEDOR", 90.0),
            ("SECRETARIA", 80.0),
            ("OPERARIO", 70.0),
            ("SUPERVISOR", 50.0),
            ("TECNICO", 45.0),
            ("OTHERS", 1.0),
        ];

        Self {
            occupation: to_mapping(&occupation),
            employer: to_mapping(&employer),
            job_title: FrequencyMapping::new(),
        }
    }

    /// Mapping for one category.
    pub fn mapping(&self, category: Category) -> &FrequencyMapping {
        match category {
            Category::Occupation => &self.occupation,
            Category::Employer => &self.employer,
            Category::JobTitle => &self.job_title,
        }
    }

    /// Keys normalized the same way inputs are.
    fn normalized(self) -> Self {
        let normalize = |m: FrequencyMapping| -> FrequencyMapping {
            let mut out = FrequencyMapping::with_capacity(m.len());
            for (k, v) in m {
                *out.entry(normalize_key(&k)).or_insert(0.0) += v;
            }
            out
        };
        Self {
            occupation: normalize(self.occupation),
            employer: normalize(self.employer),
            job_title: normalize(self.job_title),
        }
    }
}

fn to_mapping(pairs: &[(&str, f64)]) -> FrequencyMapping {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn normalize_key(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Scores categorical values against the training mappings.
#[derive(Debug, Clone)]
pub struct FrequencyEncoder {
    mappings: FrequencyMappings,
    /// Unseen-category score per category, precomputed
    fallbacks: HashMap<Category, f64>,
}

impl FrequencyEncoder {
    pub fn new(mappings: FrequencyMappings) -> Self {
        let fallbacks = [Category::Occupation, Category::Employer, Category::JobTitle]
            .into_iter()
            .map(|c| (c, unseen_score(mappings.mapping(c))))
            .collect();
        Self {
            mappings,
            fallbacks,
        }
    }

    /// Frequency score of a raw value. Unseen or missing values score as the
    /// minimum count in the mapping, or 1 when the mapping is empty.
    pub fn encode(&self, category: Category, value: Option<&str>) -> f64 {
        let fallback = self.fallback(category);
        match value {
            Some(raw) => self
                .mappings
                .mapping(category)
                .get(&normalize_key(raw))
                .copied()
                .unwrap_or(fallback),
            None => fallback,
        }
    }

    /// Score used for values absent from the mapping.
    pub fn fallback(&self, category: Category) -> f64 {
        self.fallbacks.get(&category).copied().unwrap_or(1.0)
    }

    pub fn mappings(&self) -> &FrequencyMappings {
        &self.mappings
    }
}

fn unseen_score(mapping: &FrequencyMapping) -> f64 {
    mapping
        .values()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |min: Option<f64>, v| Some(min.map_or(v, |m| m.min(v))))
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> FrequencyEncoder {
        let mut mappings = FrequencyMappings::default();
        mappings.occupation = to_mapping(&[("INGENIERO", 150.0), ("CONTADOR", 120.0), ("PILOTO", 7.0)]);
        FrequencyEncoder::new(mappings)
    }

    #[test]
    fn test_known_value_returns_count() {
        let enc = encoder();
        assert_eq!(enc.encode(Category::Occupation, Some("INGENIERO")), 150.0);
        assert_eq!(enc.encode(Category::Occupation, Some("  contador ")), 120.0);
    }

    #[test]
    fn test_unseen_value_returns_minimum_not_zero() {
        let enc = encoder();
        assert_eq!(enc.encode(Category::Occupation, Some("ASTRONAUTA")), 7.0);
        assert_eq!(enc.encode(Category::Occupation, None), 7.0);
    }

    #[test]
    fn test_empty_mapping_returns_one() {
        let enc = encoder();
        assert_eq!(enc.encode(Category::JobTitle, Some("GERENTE")), 1.0);
        assert_eq!(enc.fallback(Category::Employer), 1.0);
    }

    #[test]
    fn test_fallback_table() {
        let enc = FrequencyEncoder::new(FrequencyMappings::fallback());
        assert_eq!(enc.encode(Category::Employer, Some("Tech Company SA")), 60.0);
        assert_eq!(enc.encode(Category::Employer, Some("ACME")), 1.0);
        assert_eq!(enc.encode(Category::Occupation, Some("ingeniero")), 150.0);
    }

    #[test]
    fn test_load_normalizes_keys_and_accepts_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freq.json");
        std::fs::write(
            &path,
            r#"{"occupation": {" ingeniero": 10, "INGENIERO": 5}, "nombreempleadorcliente": {"ice": 3}}"#,
        )
        .unwrap();

        let mappings = FrequencyMappings::load(&path).unwrap();
        assert_eq!(mappings.occupation.get("INGENIERO"), Some(&15.0));
        assert_eq!(mappings.employer.get("ICE"), Some(&3.0));
        assert!(mappings.job_title.is_empty());
    }

    #[test]
    fn test_load_missing_file_uses_fallback() {
        let mappings = FrequencyMappings::load("/no/such/mappings.json").unwrap();
        assert_eq!(mappings, FrequencyMappings::fallback());
    }
}
