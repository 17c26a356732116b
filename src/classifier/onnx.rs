use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use ndarray::{Array2, ArrayView2, CowArray};
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use tracing::debug;

use super::model::Classifier;

pub fn onnx_environment() -> Result<Arc<Environment>> {
    let environment = Environment::builder()
        .with_name("flowcascade")
        .with_log_level(LoggingLevel::Warning)
        .build()
        .context("Failed to create ONNX environment")?;
    Ok(Arc::new(environment))
}

/// Classifier backed by an ONNX graph whose first `f32` output is the
/// `[rows, classes]` probability matrix.
pub struct OnnxClassifier {
    name: String,
    // Sessions borrow the environment; keep it alive as long as the session.
    _environment: Arc<Environment>,
    session: Mutex<Session>,
    n_features: Option<usize>,
    classes: Vec<u32>,
}

impl OnnxClassifier {
    pub fn load(environment: &Arc<Environment>, path: &Path, n_classes: usize) -> Result<Self> {
        let session = SessionBuilder::new(environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(1)?
            .with_model_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let n_features = session
            .inputs
            .first()
            .and_then(|input| input.dimensions.last().copied().flatten())
            .map(|d| d as usize);

        Ok(Self {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "onnx".to_string()),
            _environment: environment.clone(),
            session: Mutex::new(session),
            n_features,
            classes: (0..n_classes as u32).collect(),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let rows = features.nrows();
        if rows == 0 {
            return Ok(Array2::zeros((0, self.classes.len())));
        }

        let cow: CowArray<'_, f32, _> = features.as_standard_layout().into_dyn();

        let t0 = Instant::now();

        let session = self
            .session
            .lock()
            .map_err(|e| anyhow!("Failed to lock session: {}", e))?;

        let tensor =
            Value::from_array(session.allocator(), &cow).context("Failed to create input tensor")?;

        let outputs = session
            .run(vec![tensor])
            .with_context(|| format!("Failed to run model {}", self.name))?;

        let probs = outputs
            .iter()
            .find_map(|o| o.try_extract::<f32>().ok())
            .map(|t| t.view().iter().copied().collect::<Vec<f32>>())
            .ok_or_else(|| anyhow!("No probability output from model {}", self.name))?;

        debug!(
            model = %self.name,
            rows,
            micros = t0.elapsed().as_micros() as u64,
            "onnx inference"
        );

        if probs.len() % rows != 0 {
            return Err(anyhow!(
                "probability output of length {} does not divide into {} rows",
                probs.len(),
                rows
            ));
        }
        let cols = probs.len() / rows;
        Array2::from_shape_vec((rows, cols), probs).context("Failed to shape probability output")
    }
}
