use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ort::Environment;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::classifier::{onnx_environment, Classifier, OnnxClassifier, RandomForest, ATTACK_CLASS};
use crate::error::ArtifactLoadError;

use super::labels::LabelVocabulary;
use super::scaler::MinMaxScaler;

pub const SCALER_FILE: &str = "minmax_scaler.json";
pub const BINARY_MODEL_STEM: &str = "rf_binary_model";
pub const MULTI_MODEL_STEM: &str = "rf_multi_model";
pub const LABELS_FILE: &str = "label_encoder.json";
pub const FEATURE_COLUMNS_FILE: &str = "feature_columns.json";
pub const DROPPED_COLUMNS_FILE: &str = "dropped_correlated_columns.json";

/// Everything inference needs, loaded once and never mutated.
pub struct ArtifactBundle {
    scaler: MinMaxScaler,
    feature_columns: Vec<String>,
    dropped_columns: BTreeSet<String>,
    vocabulary: LabelVocabulary,
    binary: Box<dyn Classifier>,
    multiclass: Box<dyn Classifier>,
}

impl fmt::Debug for ArtifactBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactBundle")
            .field("features", &self.feature_columns.len())
            .field("dropped", &self.dropped_columns.len())
            .field("classes", &self.vocabulary.len())
            .field("binary", &self.binary.name())
            .field("multiclass", &self.multiclass.name())
            .finish()
    }
}

impl ArtifactBundle {
    /// Loads every artifact from `dir` and cross-checks them. Either the whole
    /// bundle is usable or nothing is returned.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self, ArtifactLoadError> {
        let dir = dir.as_ref();
        info!("Loading artifacts from {}", dir.display());

        let scaler: MinMaxScaler = read_json("scaler", &dir.join(SCALER_FILE))?;
        let feature_columns: Vec<String> =
            read_json("feature columns", &dir.join(FEATURE_COLUMNS_FILE))?;

        let dropped_path = dir.join(DROPPED_COLUMNS_FILE);
        let dropped_columns: Vec<String> = if dropped_path.exists() {
            read_json("dropped columns", &dropped_path)?
        } else {
            Vec::new()
        };

        let labels_path = dir.join(LABELS_FILE);
        let vocabulary = LabelVocabulary::from_json(&read_text("label vocabulary", &labels_path)?)
            .map_err(|reason| ArtifactLoadError::Corrupt {
                artifact: "label vocabulary",
                path: labels_path,
                reason,
            })?;

        // An ONNX model emits one probability column per id below the span,
        // so every one of those ids needs a label.
        if dir.join(format!("{MULTI_MODEL_STEM}.onnx")).exists() {
            let gaps = vocabulary.gaps();
            if !gaps.is_empty() {
                return Err(mismatch(
                    "label vocabulary",
                    format!(
                        "ids {gaps:?} have no label but the ONNX multiclass model outputs \
                         every class id below {}",
                        vocabulary.class_span()
                    ),
                ));
            }
        }

        let mut environment = None;
        let binary = load_classifier(
            "binary classifier",
            dir,
            BINARY_MODEL_STEM,
            2,
            &mut environment,
        )?;
        let multiclass = load_classifier(
            "multiclass classifier",
            dir,
            MULTI_MODEL_STEM,
            vocabulary.class_span(),
            &mut environment,
        )?;

        let bundle = Self::from_parts(
            scaler,
            feature_columns,
            dropped_columns,
            vocabulary,
            binary,
            multiclass,
        )?;
        info!(
            features = bundle.feature_count(),
            dropped = bundle.dropped_columns.len(),
            classes = bundle.vocabulary.len(),
            binary = bundle.binary.name(),
            multiclass = bundle.multiclass.name(),
            "Artifacts loaded"
        );
        Ok(bundle)
    }

    /// Assembles a bundle from already-loaded parts, applying the same
    /// consistency checks as [`ArtifactBundle::load`].
    pub fn from_parts(
        scaler: MinMaxScaler,
        feature_columns: Vec<String>,
        dropped_columns: Vec<String>,
        vocabulary: LabelVocabulary,
        binary: Box<dyn Classifier>,
        multiclass: Box<dyn Classifier>,
    ) -> Result<Self, ArtifactLoadError> {
        if feature_columns.is_empty() {
            return Err(mismatch("feature columns", "list is empty"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = feature_columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(mismatch("feature columns", format!("'{dup}' is listed twice")));
        }

        scaler
            .validate()
            .map_err(|reason| mismatch("scaler", reason))?;
        if scaler.len() != feature_columns.len() {
            return Err(mismatch(
                "scaler",
                format!(
                    "has {} columns, feature list has {}",
                    scaler.len(),
                    feature_columns.len()
                ),
            ));
        }

        let dropped_columns: BTreeSet<String> = dropped_columns.into_iter().collect();
        if let Some(both) = dropped_columns.iter().find(|c| seen.contains(c.as_str())) {
            return Err(mismatch(
                "dropped columns",
                format!("'{both}' is also a canonical feature column"),
            ));
        }

        let mut binary_classes = binary.classes().to_vec();
        binary_classes.sort_unstable();
        if binary_classes != [0, ATTACK_CLASS] {
            return Err(mismatch(
                "binary classifier",
                format!("classes are {:?}, expected [0, 1]", binary.classes()),
            ));
        }

        for (artifact, model) in [
            ("binary classifier", &binary),
            ("multiclass classifier", &multiclass),
        ] {
            if let Some(n) = model.n_features() {
                if n != feature_columns.len() {
                    return Err(mismatch(
                        artifact,
                        format!("expects {n} features, feature list has {}", feature_columns.len()),
                    ));
                }
            }
        }

        if multiclass.classes().is_empty() {
            return Err(mismatch("multiclass classifier", "declares no classes"));
        }
        let unlabelled: Vec<u32> = multiclass
            .classes()
            .iter()
            .copied()
            .filter(|id| !vocabulary.contains(*id))
            .collect();
        if !unlabelled.is_empty() {
            return Err(mismatch(
                "label vocabulary",
                format!("has no label for multiclass class ids {unlabelled:?}"),
            ));
        }

        Ok(Self {
            scaler,
            feature_columns,
            dropped_columns,
            vocabulary,
            binary,
            multiclass,
        })
    }

    pub fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn feature_count(&self) -> usize {
        self.feature_columns.len()
    }

    pub fn dropped_columns(&self) -> &BTreeSet<String> {
        &self.dropped_columns
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn binary(&self) -> &dyn Classifier {
        self.binary.as_ref()
    }

    pub fn multiclass(&self) -> &dyn Classifier {
        self.multiclass.as_ref()
    }
}

fn mismatch(artifact: &'static str, reason: impl Into<String>) -> ArtifactLoadError {
    ArtifactLoadError::Mismatch {
        artifact,
        reason: reason.into(),
    }
}

fn read_text(artifact: &'static str, path: &Path) -> Result<String, ArtifactLoadError> {
    if !path.exists() {
        return Err(ArtifactLoadError::Missing {
            artifact,
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|e| ArtifactLoadError::Corrupt {
        artifact,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_json<T: DeserializeOwned>(
    artifact: &'static str,
    path: &Path,
) -> Result<T, ArtifactLoadError> {
    let s = read_text(artifact, path)?;
    serde_json::from_str(&s).map_err(|e| ArtifactLoadError::Corrupt {
        artifact,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

// An ONNX export takes precedence over a serialized forest with the same stem.
fn load_classifier(
    artifact: &'static str,
    dir: &Path,
    stem: &str,
    n_classes: usize,
    environment: &mut Option<Arc<Environment>>,
) -> Result<Box<dyn Classifier>, ArtifactLoadError> {
    let onnx_path = dir.join(format!("{stem}.onnx"));
    let forest_path = dir.join(format!("{stem}.json"));
    let corrupt = |path: &PathBuf, e: anyhow::Error| ArtifactLoadError::Corrupt {
        artifact,
        path: path.clone(),
        reason: format!("{e:#}"),
    };

    if onnx_path.exists() {
        let env = match environment {
            Some(env) => env.clone(),
            None => {
                let env = onnx_environment().map_err(|e| corrupt(&onnx_path, e))?;
                *environment = Some(env.clone());
                env
            }
        };
        let model =
            OnnxClassifier::load(&env, &onnx_path, n_classes).map_err(|e| corrupt(&onnx_path, e))?;
        return Ok(Box::new(model));
    }

    if forest_path.exists() {
        let model = RandomForest::load(&forest_path).map_err(|e| corrupt(&forest_path, e))?;
        return Ok(Box::new(model));
    }

    Err(ArtifactLoadError::Missing {
        artifact,
        path: onnx_path,
    })
}
