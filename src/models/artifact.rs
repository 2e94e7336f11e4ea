//! Artifact bundle resolution.
//!
//! Training runs have saved the model in several shapes over time: a bare
//! model, a bundle keyed by one of several names, or a list of parts. The
//! loader searches the known shapes and fails hard when nothing that can
//! predict is found.

use crate::error::ModelArtifactError;
use crate::models::gbm::{GbmDump, GbmRegressor};
use crate::models::scaler::StandardScaler;
use crate::models::Regressor;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};

/// Bundle keys that may hold the model, in search order.
pub const MODEL_KEYS: [&str; 7] = [
    "model",
    "best_model",
    "final_model",
    "final_production_model",
    "xgb_model",
    "regressor",
    "estimator",
];

/// Bundle keys that may hold the scaler, in search order.
pub const SCALER_KEYS: [&str; 3] = ["scaler", "final_scaler", "feature_scaler"];

/// Bundle keys that may hold the ordered feature list, in search order.
pub const FEATURE_KEYS: [&str; 3] = ["feature_names", "feature_columns", "features"];

/// A loaded model bundle. Immutable after load.
pub struct ModelArtifact {
    pub model: Box<dyn Regressor>,
    pub scaler: Option<StandardScaler>,
    /// Feature names in the order the model expects them
    pub feature_names: Vec<String>,
    pub ci_lower_offset: Option<f64>,
    pub ci_upper_offset: Option<f64>,
    pub model_version: Option<String>,
    pub training_info: Option<Value>,
}

impl std::fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("model", &self.model.name())
            .field("scaler", &self.scaler.is_some())
            .field("feature_names", &self.feature_names)
            .field("ci_lower_offset", &self.ci_lower_offset)
            .field("ci_upper_offset", &self.ci_upper_offset)
            .field("model_version", &self.model_version)
            .finish()
    }
}

/// Bundle metadata found alongside the model.
#[derive(Debug, Default)]
struct BundleParts<'a> {
    model: Option<&'a Value>,
    scaler: Option<&'a Value>,
    features: Option<&'a Value>,
    meta: Option<&'a Map<String, Value>>,
}

impl ModelArtifact {
    /// Load an artifact from disk. With the `onnx` feature, `.onnx` files are
    /// loaded through ONNX Runtime with metadata from a sidecar `<stem>.json`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelArtifactError> {
        let path = path.as_ref();
        let is_onnx = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("onnx"))
            .unwrap_or(false);

        if is_onnx {
            return Self::load_onnx(path);
        }

        let value = read_json(path)?;
        let artifact = Self::from_value(&value)?;
        info!(
            path = %path.display(),
            model = artifact.model.name(),
            features = artifact.feature_names.len(),
            scaler = artifact.scaler.is_some(),
            "Model artifact loaded"
        );
        Ok(artifact)
    }

    #[cfg(feature = "onnx")]
    fn load_onnx(path: &Path) -> Result<Self, ModelArtifactError> {
        let sidecar = path.with_extension("json");
        let value = read_json(&sidecar)?;
        let parts = locate_metadata(&value);
        let model = crate::models::onnx::OnnxRegressor::load(path, 1)?;
        let artifact = Self::assemble(Box::new(model), &parts, None)?;
        info!(
            path = %path.display(),
            sidecar = %sidecar.display(),
            features = artifact.feature_names.len(),
            "ONNX model artifact loaded"
        );
        Ok(artifact)
    }

    #[cfg(not(feature = "onnx"))]
    fn load_onnx(path: &Path) -> Result<Self, ModelArtifactError> {
        Err(ModelArtifactError::Runtime(format!(
            "{} is an ONNX model but the crate was built without the `onnx` feature",
            path.display()
        )))
    }

    /// Resolve an artifact from its parsed JSON document.
    pub fn from_value(value: &Value) -> Result<Self, ModelArtifactError> {
        let parts = locate(value)?;
        let model_value = parts.model.ok_or_else(|| ModelArtifactError::NoModel {
            searched: MODEL_KEYS.iter().map(|k| k.to_string()).collect(),
        })?;
        let dump: GbmDump = serde_json::from_value(model_value.clone())?;

        // The model may carry its own feature list
        let embedded = (!dump.feature_names.is_empty()).then(|| dump.feature_names.clone());
        let names = match (parts.features, embedded) {
            (Some(v), embedded) => {
                let declared = feature_list(v)?;
                if let Some(embedded) = embedded.filter(|e| *e != declared) {
                    return Err(ModelArtifactError::FeatureMismatch {
                        missing: declared.iter().filter(|n| !embedded.contains(n)).cloned().collect(),
                        unexpected: embedded.iter().filter(|n| !declared.contains(n)).cloned().collect(),
                    });
                }
                declared
            }
            (None, Some(embedded)) => embedded,
            (None, None) => return Err(ModelArtifactError::MissingFeatureList),
        };

        let model = GbmRegressor::from_dump(dump, &names)?;
        debug!(trees = model.tree_count(), base_score = model.base_score(), "Tree ensemble resolved");
        Self::assemble(Box::new(model), &parts, Some(names))
    }

    fn assemble(
        model: Box<dyn Regressor>,
        parts: &BundleParts<'_>,
        names: Option<Vec<String>>,
    ) -> Result<Self, ModelArtifactError> {
        let feature_names = match names {
            Some(names) => names,
            None => feature_list(parts.features.ok_or(ModelArtifactError::MissingFeatureList)?)?,
        };
        if feature_names.is_empty() {
            return Err(ModelArtifactError::MissingFeatureList);
        }

        let scaler = parts
            .scaler
            .map(|v| serde_json::from_value::<StandardScaler>(v.clone()))
            .transpose()?;
        if let Some(scaler) = &scaler {
            scaler.check(feature_names.len())?;
        }

        let meta_f64 = |key: &str| parts.meta.and_then(|m| m.get(key)).and_then(Value::as_f64);
        let model_version = parts
            .meta
            .and_then(|m| m.get("model_version"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let training_info = parts.meta.and_then(|m| m.get("training_info")).cloned();

        Ok(Self {
            model,
            scaler,
            feature_names,
            ci_lower_offset: meta_f64("ci_lower_offset"),
            ci_upper_offset: meta_f64("ci_upper_offset"),
            model_version,
            training_info,
        })
    }
}

fn read_json(path: &Path) -> Result<Value, ModelArtifactError> {
    let text = std::fs::read_to_string(path).map_err(|source| ModelArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Whether a JSON value looks like a serialized tree ensemble.
pub fn is_model(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.get("trees").map(Value::is_array).unwrap_or(false)
                || map.get("type").and_then(Value::as_str) == Some("gbtree")
        }
        _ => false,
    }
}

/// Whether a JSON value looks like a fitted standard scaler.
pub fn is_scaler(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            (map.contains_key("mean") || map.contains_key("mean_"))
                && (map.contains_key("scale") || map.contains_key("scale_") || map.contains_key("std"))
        }
        _ => false,
    }
}

fn is_feature_list(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(Value::is_string),
        _ => false,
    }
}

fn locate(value: &Value) -> Result<BundleParts<'_>, ModelArtifactError> {
    if is_model(value) {
        debug!("Artifact is a bare model");
        return Ok(BundleParts {
            model: Some(value),
            ..Default::default()
        });
    }

    match value {
        Value::Object(map) => {
            let mut parts = locate_metadata(value);
            parts.model = MODEL_KEYS
                .iter()
                .find_map(|k| map.get(*k).filter(|v| is_model(v)).map(|v| (*k, v)))
                .or_else(|| map.iter().find(|(_, v)| is_model(v)).map(|(k, v)| (k.as_str(), v)))
                .map(|(key, v)| {
                    debug!(key, "Model found in bundle");
                    v
                });
            Ok(parts)
        }
        Value::Array(items) => Ok(BundleParts {
            model: items.iter().find(|v| is_model(v)),
            scaler: items.iter().find(|v| is_scaler(v)),
            features: items.iter().find(|v| is_feature_list(v)),
            meta: None,
        }),
        _ => Err(ModelArtifactError::NoModel {
            searched: MODEL_KEYS.iter().map(|k| k.to_string()).collect(),
        }),
    }
}

/// Scaler, feature list and metadata from a bundle object, ignoring the model.
fn locate_metadata(value: &Value) -> BundleParts<'_> {
    let Value::Object(map) = value else {
        return BundleParts::default();
    };
    BundleParts {
        model: None,
        scaler: SCALER_KEYS
            .iter()
            .find_map(|k| map.get(*k).filter(|v| is_scaler(v))),
        features: FEATURE_KEYS
            .iter()
            .find_map(|k| map.get(*k).filter(|v| is_feature_list(v))),
        meta: Some(map),
    }
}

fn feature_list(value: &Value) -> Result<Vec<String>, ModelArtifactError> {
    Ok(serde_json::from_value(value.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> Value {
        json!({"nodeid": 0, "leaf": 250.0})
    }

    #[test]
    fn test_bare_model_with_embedded_features() {
        let value = json!({"base_score": 1000.0, "feature_names": ["edad"], "trees": [tree()]});
        let artifact = ModelArtifact::from_value(&value).unwrap();
        assert_eq!(artifact.feature_names, vec!["edad"]);
        assert!(artifact.scaler.is_none());
        assert_eq!(artifact.model.predict(&[vec![30.0]]).unwrap(), vec![1250.0]);
    }

    #[test]
    fn test_bundle_keys_are_searched_in_order() {
        let value = json!({
            "estimator": {"base_score": 1.0, "trees": [tree()]},
            "final_model": {"base_score": 2.0, "trees": [tree()]},
            "feature_columns": ["edad", "saldo"],
            "final_scaler": {"mean": [0.0, 0.0], "scale": [1.0, 1.0]},
            "ci_lower_offset": -400.0,
            "ci_upper_offset": 600.0,
            "model_version": "v9"
        });
        let artifact = ModelArtifact::from_value(&value).unwrap();
        assert_eq!(artifact.model.predict(&[vec![0.0, 0.0]]).unwrap(), vec![252.0]);
        assert!(artifact.scaler.is_some());
        assert_eq!(artifact.ci_lower_offset, Some(-400.0));
        assert_eq!(artifact.ci_upper_offset, Some(600.0));
        assert_eq!(artifact.model_version.as_deref(), Some("v9"));
    }

    #[test]
    fn test_unknown_key_falls_back_to_first_model_value() {
        let value = json!({"my_booster": {"trees": [tree()]}, "features": ["edad"]});
        let artifact = ModelArtifact::from_value(&value).unwrap();
        assert_eq!(artifact.model.predict(&[vec![1.0]]).unwrap(), vec![250.0]);
    }

    #[test]
    fn test_array_bundle() {
        let value = json!([
            ["edad"],
            {"mean": [10.0], "scale": [2.0]},
            {"type": "gbtree", "trees": [tree()]}
        ]);
        let artifact = ModelArtifact::from_value(&value).unwrap();
        assert_eq!(artifact.feature_names, vec!["edad"]);
        assert!(artifact.scaler.is_some());
    }

    #[test]
    fn test_no_model_is_hard_error() {
        let value = json!({"scaler": {"mean": [0.0], "scale": [1.0]}, "features": ["edad"]});
        let err = ModelArtifact::from_value(&value).unwrap_err();
        assert!(matches!(err, ModelArtifactError::NoModel { .. }));
    }

    #[test]
    fn test_missing_feature_list() {
        let value = json!({"model": {"trees": [tree()]}});
        let err = ModelArtifact::from_value(&value).unwrap_err();
        assert!(matches!(err, ModelArtifactError::MissingFeatureList));
    }

    #[test]
    fn test_scaler_width_must_match_features() {
        let value = json!({
            "model": {"trees": [tree()]},
            "features": ["edad", "saldo"],
            "scaler": {"mean": [0.0], "scale": [1.0]}
        });
        let err = ModelArtifact::from_value(&value).unwrap_err();
        assert!(matches!(err, ModelArtifactError::ScalerShape { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ModelArtifact::load("/no/such/model.json").unwrap_err();
        assert!(matches!(err, ModelArtifactError::Read { .. }));
    }
}
