use std::time::Instant;

use ndarray::{Array2, ArrayView2, Axis};
use tracing::debug;

use crate::artifacts::ArtifactBundle;
use crate::error::InferenceError;
use crate::types::{AlignedBatch, Prediction, Stage};

use super::model::{argmax, Classifier};

/// Class id the binary gate uses for attack traffic.
pub const ATTACK_CLASS: u32 = 1;

/// How the binary gate's probabilities become an attack flag.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AttackGate {
    /// Attack when the attack class has the highest probability.
    #[default]
    ArgMax,
    /// Attack when `P(attack) >= threshold`.
    Threshold(f32),
}

impl AttackGate {
    pub fn from_threshold(threshold: Option<f32>) -> Self {
        threshold.map_or(AttackGate::ArgMax, AttackGate::Threshold)
    }
}

/// Binary gate followed by the multiclass model on flagged rows only.
#[derive(Debug, Clone, Default)]
pub struct CascadeClassifier {
    gate: AttackGate,
}

impl CascadeClassifier {
    pub fn new(gate: AttackGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> AttackGate {
        self.gate
    }

    pub fn classify(
        &self,
        batch: &AlignedBatch,
        bundle: &ArtifactBundle,
    ) -> Result<Vec<Prediction>, InferenceError> {
        let rows = batch.rows();
        let canonical = bundle.feature_count();
        check_width(Stage::Binary, bundle.binary(), batch.width(), canonical)?;
        check_width(Stage::Multiclass, bundle.multiclass(), batch.width(), canonical)?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        let t0 = Instant::now();
        let binary = bundle.binary();
        let bin_probs = run_stage(Stage::Binary, binary, batch.view(), rows)?;
        let attack_col = binary
            .classes()
            .iter()
            .position(|c| *c == ATTACK_CLASS)
            .ok_or(InferenceError::ClassCount {
                stage: Stage::Binary,
                expected: 2,
                found: binary.classes().len(),
            })?;

        let mut predictions = Vec::with_capacity(rows);
        let mut attack_rows = Vec::new();
        for (i, probs) in bin_probs.outer_iter().enumerate() {
            let p_attack = probs[attack_col];
            let is_attack = match self.gate {
                AttackGate::ArgMax => argmax(probs) == Some(attack_col),
                AttackGate::Threshold(t) => p_attack >= t,
            };
            if is_attack {
                attack_rows.push(i);
            }
            predictions.push(Prediction::normal(p_attack));
        }
        debug!(
            rows,
            attacks = attack_rows.len(),
            micros = t0.elapsed().as_micros() as u64,
            "binary stage done"
        );

        if attack_rows.is_empty() {
            return Ok(predictions);
        }

        let t1 = Instant::now();
        let multiclass = bundle.multiclass();
        let subset = batch.view().select(Axis(0), &attack_rows);
        let multi_probs =
            run_stage(Stage::Multiclass, multiclass, subset.view(), attack_rows.len())?;

        for (probs, &row) in multi_probs.outer_iter().zip(&attack_rows) {
            let col = argmax(probs).ok_or(InferenceError::ClassCount {
                stage: Stage::Multiclass,
                expected: multiclass.classes().len(),
                found: 0,
            })?;
            let class_id = multiclass.classes()[col];
            let label = bundle
                .vocabulary()
                .lookup(class_id)
                .ok_or(InferenceError::UnknownClass { class_id })?;
            predictions[row].label = label.to_string();
        }
        debug!(
            rows = attack_rows.len(),
            micros = t1.elapsed().as_micros() as u64,
            "multiclass stage done"
        );

        Ok(predictions)
    }
}

/// Classifies with the default arg-max gate.
pub fn classify(
    batch: &AlignedBatch,
    bundle: &ArtifactBundle,
) -> Result<Vec<Prediction>, InferenceError> {
    CascadeClassifier::default().classify(batch, bundle)
}

fn check_width(
    stage: Stage,
    model: &dyn Classifier,
    width: usize,
    canonical: usize,
) -> Result<(), InferenceError> {
    let expected = model.n_features().unwrap_or(canonical);
    if width != expected {
        return Err(InferenceError::FeatureWidth {
            stage,
            expected,
            found: width,
        });
    }
    Ok(())
}

fn run_stage(
    stage: Stage,
    model: &dyn Classifier,
    features: ArrayView2<'_, f32>,
    rows: usize,
) -> Result<Array2<f32>, InferenceError> {
    let probs = model
        .predict_proba(features)
        .map_err(|e| InferenceError::Backend {
            stage,
            reason: format!("{e:#}"),
        })?;
    if probs.nrows() != rows {
        return Err(InferenceError::RowCount {
            stage,
            expected: rows,
            found: probs.nrows(),
        });
    }
    if probs.ncols() != model.classes().len() {
        return Err(InferenceError::ClassCount {
            stage,
            expected: model.classes().len(),
            found: probs.ncols(),
        });
    }
    Ok(probs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{LabelVocabulary, MinMaxScaler};
    use anyhow::Result;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scores each row with a closure over its features.
    struct RowModel {
        classes: Vec<u32>,
        calls: Arc<AtomicUsize>,
        score: fn(&[f32]) -> Vec<f32>,
    }

    impl Classifier for RowModel {
        fn name(&self) -> &str {
            "row-model"
        }

        fn n_features(&self) -> Option<usize> {
            Some(2)
        }

        fn classes(&self) -> &[u32] {
            &self.classes
        }

        fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Array2::zeros((features.nrows(), self.classes.len()));
            for (i, row) in features.outer_iter().enumerate() {
                let row: Vec<f32> = row.to_vec();
                for (j, p) in (self.score)(&row).into_iter().enumerate() {
                    out[[i, j]] = p;
                }
            }
            Ok(out)
        }
    }

    // Feature 0 is P(attack); feature 1 selects the multiclass column.
    fn gate_score(row: &[f32]) -> Vec<f32> {
        vec![1.0 - row[0], row[0]]
    }

    fn multi_score(row: &[f32]) -> Vec<f32> {
        if row[1] < 0.5 {
            vec![0.9, 0.1]
        } else {
            vec![0.2, 0.8]
        }
    }

    fn bundle_with(multi_classes: Vec<u32>, calls: Arc<AtomicUsize>) -> ArtifactBundle {
        let binary = RowModel {
            classes: vec![0, 1],
            calls: Arc::new(AtomicUsize::new(0)),
            score: gate_score,
        };
        let multi = RowModel {
            classes: multi_classes,
            calls,
            score: multi_score,
        };
        ArtifactBundle::from_parts(
            MinMaxScaler::new(vec![0.0, 0.0], vec![1.0, 1.0]),
            vec!["a".into(), "b".into()],
            Vec::new(),
            LabelVocabulary::from_labels([(2, "DoS"), (5, "PortScan")]).unwrap(),
            Box::new(binary),
            Box::new(multi),
        )
        .unwrap()
    }

    #[test]
    fn test_cascade_writes_labels_back_in_row_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bundle = bundle_with(vec![2, 5], calls.clone());
        let batch = AlignedBatch::new(array![[0.9f32, 0.0], [0.1, 0.9], [0.8, 0.9]]);

        let preds = classify(&batch, &bundle).unwrap();
        let labels: Vec<&str> = preds.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["DoS", "Normal", "PortScan"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!((preds[1].attack_probability - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_benign_rows_never_get_attack_labels() {
        let bundle = bundle_with(vec![2, 5], Arc::new(AtomicUsize::new(0)));
        let batch = AlignedBatch::new(array![[0.4f32, 0.9], [0.0, 0.0], [0.7, 0.9], [0.2, 0.1]]);

        let preds = classify(&batch, &bundle).unwrap();
        assert_eq!(preds.len(), 4);
        for (i, p) in preds.iter().enumerate() {
            if batch.view()[[i, 0]] < 0.5 {
                assert!(p.is_normal(), "row {i} should stay Normal");
            } else {
                assert!(!p.is_normal());
            }
        }
    }

    #[test]
    fn test_all_normal_skips_multiclass() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bundle = bundle_with(vec![2, 5], calls.clone());
        let batch = AlignedBatch::new(array![[0.1f32, 0.9], [0.2, 0.1]]);

        let preds = classify(&batch, &bundle).unwrap();
        assert!(preds.iter().all(Prediction::is_normal));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_batch_yields_no_predictions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let bundle = bundle_with(vec![2, 5], calls.clone());
        let preds = classify(&AlignedBatch::empty(2), &bundle).unwrap();
        assert!(preds.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_batch_with_wrong_width_is_an_error() {
        let bundle = bundle_with(vec![2, 5], Arc::new(AtomicUsize::new(0)));
        let err = classify(&AlignedBatch::empty(3), &bundle).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::FeatureWidth {
                stage: Stage::Binary,
                expected: 2,
                found: 3
            }
        ));
    }

    /// Declares the vocabulary's classes but emits an extra column.
    struct WideModel;

    impl Classifier for WideModel {
        fn name(&self) -> &str {
            "wide"
        }

        fn n_features(&self) -> Option<usize> {
            None
        }

        fn classes(&self) -> &[u32] {
            &[2, 5]
        }

        fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            Ok(Array2::zeros((features.nrows(), 3)))
        }
    }

    #[test]
    fn test_malformed_multiclass_output_is_drift() {
        let binary = RowModel {
            classes: vec![0, 1],
            calls: Arc::new(AtomicUsize::new(0)),
            score: gate_score,
        };
        let bundle = ArtifactBundle::from_parts(
            MinMaxScaler::new(vec![0.0, 0.0], vec![1.0, 1.0]),
            vec!["a".into(), "b".into()],
            Vec::new(),
            LabelVocabulary::from_labels([(2, "DoS"), (5, "PortScan")]).unwrap(),
            Box::new(binary),
            Box::new(WideModel),
        )
        .unwrap();
        let batch = AlignedBatch::new(array![[0.9f32, 0.0]]);

        let err = classify(&batch, &bundle).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ClassCount {
                stage: Stage::Multiclass,
                expected: 2,
                found: 3
            }
        ));
        assert!(err.is_artifact_drift());
    }

    #[test]
    fn test_threshold_gate() {
        let bundle = bundle_with(vec![2, 5], Arc::new(AtomicUsize::new(0)));
        let batch = AlignedBatch::new(array![[0.6f32, 0.0], [0.9, 0.9]]);

        let strict = CascadeClassifier::new(AttackGate::Threshold(0.85));
        let labels: Vec<String> = strict
            .classify(&batch, &bundle)
            .unwrap()
            .into_iter()
            .map(|p| p.label)
            .collect();
        assert_eq!(labels, vec!["Normal", "PortScan"]);

        let loose = CascadeClassifier::new(AttackGate::from_threshold(Some(0.3)));
        assert_eq!(loose.gate(), AttackGate::Threshold(0.3));
        assert_eq!(CascadeClassifier::default().gate(), AttackGate::ArgMax);
        let labels: Vec<String> = loose
            .classify(&batch, &bundle)
            .unwrap()
            .into_iter()
            .map(|p| p.label)
            .collect();
        assert_eq!(labels, vec!["DoS", "PortScan"]);
    }
}
