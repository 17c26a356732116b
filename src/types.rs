use std::fmt;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Label assigned to every flow the binary gate does not flag.
pub const NORMAL_LABEL: &str = "Normal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Binary,
    Multiclass,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Binary => f.write_str("binary"),
            Stage::Multiclass => f.write_str("multiclass"),
        }
    }
}

/// One raw cell of a flow record.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Numbers are recognised after trimming; anything else is kept verbatim
    /// so missing markers can be resolved later.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) => Cell::Number(v),
            Err(_) => Cell::Text(raw.to_string()),
        }
    }
}

/// Rows read from one capture file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl FlowBatch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Scaled feature matrix, rows × canonical columns.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedBatch {
    values: Array2<f32>,
}

impl AlignedBatch {
    pub fn new(values: Array2<f32>) -> Self {
        Self { values }
    }

    pub fn empty(width: usize) -> Self {
        Self {
            values: Array2::zeros((0, width)),
        }
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }
}

/// Final label for one row plus the gate's attack probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub attack_probability: f32,
}

impl Prediction {
    pub fn normal(attack_probability: f32) -> Self {
        Self {
            label: NORMAL_LABEL.to_string(),
            attack_probability,
        }
    }

    pub fn is_normal(&self) -> bool {
        self.label == NORMAL_LABEL
    }
}

/// What the output sink receives for each classified flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPrediction {
    pub file: String,
    pub row: usize,
    pub label: String,
    pub attack_probability: f32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PipelineStats {
    pub files_processed: u64,
    pub files_failed: u64,
    pub flows_classified: u64,
    pub attacks_detected: u64,
    pub uptime_seconds: u64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            files_processed: 0,
            files_failed: 0,
            flows_classified: 0,
            attacks_detected: 0,
            uptime_seconds: 0,
        }
    }
}
