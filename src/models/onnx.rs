//! ONNX Runtime regressor

use crate::error::ModelArtifactError;
use crate::models::Regressor;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

fn runtime(e: impl std::fmt::Display) -> ModelArtifactError {
    ModelArtifactError::Runtime(e.to_string())
}

/// Regression model exported to ONNX (e.g. via onnxmltools).
pub struct OnnxRegressor {
    /// Session requires exclusive access to run
    session: RwLock<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxRegressor {
    /// Initialize ONNX Runtime and load a model file.
    pub fn load<P: AsRef<Path>>(path: P, threads: usize) -> Result<Self, ModelArtifactError> {
        let path = path.as_ref();
        ort::init().commit().map_err(runtime)?;

        info!(path = %path.display(), threads, "Loading ONNX model");

        let session = Session::builder()
            .map_err(runtime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime)?
            .with_intra_threads(threads)
            .map_err(runtime)?
            .commit_from_file(path)
            .map_err(|e| runtime(format!("failed to load model from {}: {e}", path.display())))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("variable") || o.name.contains("output"))
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "variable".to_string());

        info!(input = %input_name, output = %output_name, "ONNX model loaded");

        Ok(Self {
            session: RwLock::new(session),
            input_name,
            output_name,
        })
    }
}

impl Regressor for OnnxRegressor {
    fn name(&self) -> &str {
        "onnx"
    }

    fn predict(&self, rows: &[Vec<f32>]) -> Result<Vec<f64>, ModelArtifactError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        // Input tensor of shape [rows, features]
        let shape = vec![rows.len() as i64, width as i64];
        let data: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let input = Tensor::from_array((shape, data)).map_err(runtime)?;

        let mut session = self
            .session
            .write()
            .map_err(|e| runtime(format!("lock error: {e}")))?;
        let outputs = session
            .run(ort::inputs![&self.input_name => input])
            .map_err(runtime)?;

        let output = outputs
            .get(&self.output_name)
            .ok_or_else(|| runtime(format!("output {} not produced", self.output_name)))?;
        let (_, values) = output.try_extract_tensor::<f32>().map_err(runtime)?;

        debug!(rows = rows.len(), outputs = values.len(), "ONNX inference complete");
        Ok(values.iter().map(|&v| f64::from(v)).collect())
    }
}
