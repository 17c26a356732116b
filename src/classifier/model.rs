use anyhow::Result;
use ndarray::{Array2, ArrayView1, ArrayView2};

/// A trained model that scores rows of the canonical feature matrix.
///
/// `predict_proba` returns one row per input row and one column per entry of
/// `classes()`, in that order.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    /// Feature width the model was trained on, when the artifact records it.
    fn n_features(&self) -> Option<usize>;

    /// Class ids, indexed by probability column.
    fn classes(&self) -> &[u32];

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>>;
}

/// Index of the highest score; the first one wins on ties.
pub fn argmax(scores: ArrayView1<'_, f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}
