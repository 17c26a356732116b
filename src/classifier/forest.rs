//! Random forest evaluated from its serialized decision trees.
//!
//! Trees are stored as flat node arrays in pre-order: node 0 is the root and
//! every split points strictly forward, so traversal always terminates.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use super::model::Classifier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: Vec<f32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("tree has no nodes");
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if *feature >= n_features {
                        bail!("node {idx} splits on feature {feature}, forest has {n_features}");
                    }
                    if threshold.is_nan() {
                        bail!("node {idx} has a NaN threshold");
                    }
                    for child in [*left, *right] {
                        if child <= idx || child >= self.nodes.len() {
                            bail!("node {idx} points to invalid child {child}");
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != n_classes {
                        bail!(
                            "leaf {idx} has {} class weights, forest has {n_classes} classes",
                            value.len()
                        );
                    }
                    if value.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        bail!("leaf {idx} has invalid class weights");
                    }
                }
            }
        }
        Ok(())
    }

    /// Adds this tree's normalized class distribution for `row` into `acc`.
    fn accumulate(&self, row: ArrayView1<'_, f32>, acc: &mut [f32]) {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if f64::from(row[*feature]) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                TreeNode::Leaf { value } => {
                    let total: f32 = value.iter().sum();
                    if total > 0.0 {
                        for (a, w) in acc.iter_mut().zip(value) {
                            *a += w / total;
                        }
                    }
                    return;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    #[serde(default)]
    name: String,
    n_features: usize,
    classes: Vec<u32>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(n_features: usize, classes: Vec<u32>, trees: Vec<DecisionTree>) -> Result<Self> {
        let forest = Self {
            name: "random-forest".to_string(),
            n_features,
            classes,
            trees,
        };
        forest.validate()?;
        Ok(forest)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let mut forest: RandomForest =
            serde_json::from_str(s).context("Failed to parse forest json")?;
        if forest.name.is_empty() {
            forest.name = "random-forest".to_string();
        }
        forest.validate()?;
        Ok(forest)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("Failed to read forest from {}", path.display()))?;
        let mut forest = Self::from_json(&s)?;
        if let Some(stem) = path.file_stem() {
            forest.name = stem.to_string_lossy().into_owned();
        }
        Ok(forest)
    }

    fn validate(&self) -> Result<()> {
        if self.n_features == 0 {
            bail!("forest declares zero features");
        }
        if self.classes.is_empty() {
            bail!("forest declares no classes");
        }
        let mut seen = self.classes.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.classes.len() {
            bail!("forest class list has duplicates");
        }
        if self.trees.is_empty() {
            bail!("forest has no trees");
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.classes.len())
                .with_context(|| format!("tree {i}"))?;
        }
        Ok(())
    }
}

impl Classifier for RandomForest {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_features(&self) -> Option<usize> {
        Some(self.n_features)
    }

    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn predict_proba(&self, features: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if features.ncols() != self.n_features {
            return Err(anyhow!(
                "expected {} features, got {}",
                self.n_features,
                features.ncols()
            ));
        }

        let n_trees = self.trees.len() as f32;
        let mut out = Array2::<f32>::zeros((features.nrows(), self.classes.len()));
        for (row, mut probs) in features.outer_iter().zip(out.outer_iter_mut()) {
            let acc = probs
                .as_slice_mut()
                .ok_or_else(|| anyhow!("probability row is not contiguous"))?;
            for tree in &self.trees {
                tree.accumulate(row, acc);
            }
            for p in acc.iter_mut() {
                *p /= n_trees;
            }
        }
        Ok(out)
    }
}
