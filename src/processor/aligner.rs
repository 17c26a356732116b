//! Reshapes raw flow records into the scaled feature matrix the classifiers
//! were trained on.

use std::collections::{BTreeSet, HashMap};

use ndarray::Array2;

use crate::artifacts::ArtifactBundle;
use crate::error::SchemaError;
use crate::types::{AlignedBatch, Cell, FlowBatch};

/// What to do with a canonical cell that is still missing after alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MissingPolicy {
    /// Fail the file with `SchemaError::MissingValue`.
    #[default]
    Reject,
    /// Impute a raw `0.0` before scaling.
    Zero,
    /// Impute the training minimum of the column.
    TrainMin,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureAligner {
    missing: MissingPolicy,
}

impl FeatureAligner {
    pub fn new(missing: MissingPolicy) -> Self {
        Self { missing }
    }

    pub fn missing_policy(&self) -> MissingPolicy {
        self.missing
    }

    pub fn align(
        &self,
        mut batch: FlowBatch,
        bundle: &ArtifactBundle,
    ) -> Result<AlignedBatch, SchemaError> {
        if batch.is_empty() {
            return Ok(AlignedBatch::empty(bundle.feature_count()));
        }

        normalize_missing(&mut batch);
        drop_columns(&mut batch, bundle.dropped_columns());
        let projection = project(&batch, bundle.feature_columns())?;
        self.scale(&batch, &projection, bundle)
    }

    fn scale(
        &self,
        batch: &FlowBatch,
        projection: &[usize],
        bundle: &ArtifactBundle,
    ) -> Result<AlignedBatch, SchemaError> {
        let scaler = bundle.scaler();
        let columns = bundle.feature_columns();
        let mut values = Array2::<f32>::zeros((batch.len(), projection.len()));

        for (r, row) in batch.rows.iter().enumerate() {
            for (c, &src) in projection.iter().enumerate() {
                let raw = match &row[src] {
                    Cell::Number(v) => *v,
                    Cell::Missing => match self.missing {
                        MissingPolicy::Reject => {
                            return Err(SchemaError::MissingValue {
                                row: r,
                                column: columns[c].clone(),
                            })
                        }
                        MissingPolicy::Zero => 0.0,
                        MissingPolicy::TrainMin => scaler.data_min(c),
                    },
                    Cell::Text(text) => {
                        return Err(SchemaError::NonNumeric {
                            row: r,
                            column: columns[c].clone(),
                            value: text.clone(),
                        })
                    }
                };

                let scaled = scaler.transform(c, raw) as f32;
                if !scaled.is_finite() {
                    return Err(SchemaError::NonFinite {
                        row: r,
                        column: columns[c].clone(),
                    });
                }
                values[[r, c]] = scaled;
            }
        }

        Ok(AlignedBatch::new(values))
    }
}

/// Aligns with the default policy of rejecting unresolved missing values.
pub fn align(batch: FlowBatch, bundle: &ArtifactBundle) -> Result<AlignedBatch, SchemaError> {
    FeatureAligner::default().align(batch, bundle)
}

fn is_missing_marker(cell: &Cell) -> bool {
    match cell {
        Cell::Missing => true,
        Cell::Number(v) => v.is_nan(),
        Cell::Text(s) => s == "-" || s.trim().is_empty(),
    }
}

/// Replaces "-", blank and whitespace-only cells (and NaN) with `Cell::Missing`.
pub fn normalize_missing(batch: &mut FlowBatch) {
    for cell in batch.rows.iter_mut().flatten() {
        if is_missing_marker(cell) {
            *cell = Cell::Missing;
        }
    }
}

/// Removes the named columns; names not present in the batch are ignored.
pub fn drop_columns(batch: &mut FlowBatch, dropped: &BTreeSet<String>) {
    if dropped.is_empty() || !batch.columns.iter().any(|c| dropped.contains(c)) {
        return;
    }
    let keep: Vec<bool> = batch.columns.iter().map(|c| !dropped.contains(c)).collect();

    let mut flags = keep.iter();
    batch.columns.retain(|_| *flags.next().unwrap_or(&true));
    for row in &mut batch.rows {
        let mut flags = keep.iter();
        row.retain(|_| *flags.next().unwrap_or(&true));
    }
}

/// Source index in `batch` for each canonical column, in canonical order.
pub fn project(batch: &FlowBatch, canonical: &[String]) -> Result<Vec<usize>, SchemaError> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(batch.columns.len());
    let mut duplicated = Vec::new();
    for (i, name) in batch.columns.iter().enumerate() {
        if index.insert(name.as_str(), i).is_some() {
            duplicated.push(name.as_str());
        }
    }

    if let Some(dup) = canonical
        .iter()
        .find(|c| duplicated.contains(&c.as_str()))
    {
        return Err(SchemaError::DuplicateColumn(dup.clone()));
    }

    let absent: Vec<String> = canonical
        .iter()
        .filter(|c| !index.contains_key(c.as_str()))
        .cloned()
        .collect();
    if !absent.is_empty() {
        return Err(SchemaError::MissingColumns(absent));
    }

    Ok(canonical.iter().map(|c| index[c.as_str()]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{LabelVocabulary, MinMaxScaler};
    use crate::classifier::{DecisionTree, RandomForest, TreeNode};

    fn constant_forest(n_features: usize, classes: Vec<u32>) -> Box<RandomForest> {
        let mut leaf = vec![0.0; classes.len()];
        leaf[0] = 1.0;
        let tree = DecisionTree::new(vec![TreeNode::Leaf { value: leaf }]);
        Box::new(RandomForest::new(n_features, classes, vec![tree]).unwrap())
    }

    fn bundle() -> ArtifactBundle {
        ArtifactBundle::from_parts(
            MinMaxScaler::new(vec![0.0, 10.0, 0.0], vec![100.0, 20.0, 4.0]),
            vec!["duration".into(), "bytes".into(), "flags".into()],
            vec!["redundant".into(), "never_seen".into()],
            LabelVocabulary::from_labels([(0, "DoS")]).unwrap(),
            constant_forest(3, vec![0, 1]),
            constant_forest(3, vec![0]),
        )
        .unwrap()
    }

    fn batch(columns: &[&str], rows: &[&[&str]]) -> FlowBatch {
        FlowBatch::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|v| Cell::from_raw(v)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_output_follows_canonical_order() {
        let bundle = bundle();
        let a = batch(
            &["flags", "redundant", "duration", "src_ip", "bytes"],
            &[&["2", "7", "50", "10.0.0.1", "15"]],
        );
        let b = batch(
            &["bytes", "duration", "flags"],
            &[&["15", "50", "2"]],
        );

        let aligned_a = align(a, &bundle).unwrap();
        let aligned_b = align(b, &bundle).unwrap();
        assert_eq!(aligned_a.width(), 3);
        assert_eq!(aligned_a, aligned_b);
        assert_eq!(aligned_a.view()[[0, 0]], 0.5);
        assert_eq!(aligned_a.view()[[0, 1]], 0.5);
        assert_eq!(aligned_a.view()[[0, 2]], 0.5);
    }

    #[test]
    fn test_alignment_is_idempotent() {
        let bundle = bundle();
        let input = batch(
            &["duration", "bytes", "flags"],
            &[&["1.25", "13.7", "3"], &["99", "10", "0"]],
        );
        let first = align(input.clone(), &bundle).unwrap();
        let second = align(input, &bundle).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_canonical_column_lists_all_absent() {
        let bundle = bundle();
        let input = batch(&["duration"], &[&["1"]]);
        match align(input, &bundle) {
            Err(SchemaError::MissingColumns(cols)) => {
                assert_eq!(cols, vec!["bytes".to_string(), "flags".to_string()])
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_empty_batch_is_not_an_error() {
        let bundle = bundle();
        let aligned = align(batch(&["unrelated"], &[]), &bundle).unwrap();
        assert!(aligned.is_empty());
        assert_eq!(aligned.width(), 3);
    }

    #[test]
    fn test_missing_markers_are_normalized() {
        let mut input = batch(
            &["a", "b", "c", "d", "e"],
            &[&["-", " ", "", "   ", "NaN"]],
        );
        normalize_missing(&mut input);
        assert!(input.rows[0].iter().all(|c| *c == Cell::Missing));
    }

    #[test]
    fn test_missing_policy() {
        let bundle = bundle();
        let input = batch(&["duration", "bytes", "flags"], &[&["50", "-", "2"]]);

        let err = align(input.clone(), &bundle).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::MissingValue { row: 0, ref column } if column == "bytes"
        ));

        assert_eq!(FeatureAligner::default().missing_policy(), MissingPolicy::Reject);
        let zero = FeatureAligner::new(MissingPolicy::Zero)
            .align(input.clone(), &bundle)
            .unwrap();
        assert_eq!(zero.view()[[0, 1]], -1.0);

        let train_min = FeatureAligner::new(MissingPolicy::TrainMin)
            .align(input, &bundle)
            .unwrap();
        assert_eq!(train_min.view()[[0, 1]], 0.0);
    }

    #[test]
    fn test_non_numeric_and_infinite_values() {
        let bundle = bundle();
        let text = batch(&["duration", "bytes", "flags"], &[&["50", "lots", "2"]]);
        assert!(matches!(
            align(text, &bundle),
            Err(SchemaError::NonNumeric { row: 0, .. })
        ));

        let inf = batch(&["duration", "bytes", "flags"], &[&["inf", "15", "2"]]);
        assert!(matches!(
            align(inf, &bundle),
            Err(SchemaError::NonFinite { row: 0, .. })
        ));
    }

    #[test]
    fn test_duplicate_canonical_column_rejected() {
        let bundle = bundle();
        let input = batch(
            &["duration", "bytes", "flags", "bytes"],
            &[&["1", "2", "3", "4"]],
        );
        assert!(matches!(
            align(input, &bundle),
            Err(SchemaError::DuplicateColumn(ref c)) if c == "bytes"
        ));
    }

    #[test]
    fn test_drop_columns_ignores_absent_names() {
        let mut input = batch(&["a", "redundant", "b"], &[&["1", "2", "3"]]);
        let dropped: BTreeSet<String> = ["redundant", "missing"].iter().map(|s| s.to_string()).collect();
        drop_columns(&mut input, &dropped);
        assert_eq!(input.columns, vec!["a", "b"]);
        assert_eq!(input.rows[0], vec![Cell::Number(1.0), Cell::Number(3.0)]);
    }
}
