use std::path::PathBuf;

use thiserror::Error;

use crate::types::Stage;

/// Startup-only failure: the bundle is incomplete or inconsistent.
#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("artifact '{artifact}' not found at {path}")]
    Missing { artifact: &'static str, path: PathBuf },

    #[error("artifact '{artifact}' at {path} is corrupt: {reason}")]
    Corrupt {
        artifact: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("artifact '{artifact}' is inconsistent with the bundle: {reason}")]
    Mismatch {
        artifact: &'static str,
        reason: String,
    },
}

/// Input file does not fit the canonical feature schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("file is structurally unreadable: {0}")]
    Unreadable(String),

    #[error("row {row} has {found} cells, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("required feature columns absent: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("feature column '{0}' appears more than once")]
    DuplicateColumn(String),

    #[error("row {row}: missing value in column '{column}'")]
    MissingValue { row: usize, column: String },

    #[error("row {row}: non-numeric value '{value}' in column '{column}'")]
    NonNumeric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("row {row}: value in column '{column}' is not finite after scaling")]
    NonFinite { row: usize, column: String },
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("{stage} classifier expects {expected} features, batch has {found}")]
    FeatureWidth {
        stage: Stage,
        expected: usize,
        found: usize,
    },

    #[error("{stage} classifier returned {found} rows for {expected} inputs")]
    RowCount {
        stage: Stage,
        expected: usize,
        found: usize,
    },

    #[error("{stage} classifier returned {found} class columns, expected {expected}")]
    ClassCount {
        stage: Stage,
        expected: usize,
        found: usize,
    },

    #[error("class id {class_id} has no entry in the label vocabulary")]
    UnknownClass { class_id: u32 },

    #[error("{stage} classifier failed: {reason}")]
    Backend { stage: Stage, reason: String },
}

impl InferenceError {
    /// True when the failure points at the stored models disagreeing with
    /// each other rather than at the input file.
    pub fn is_artifact_drift(&self) -> bool {
        matches!(
            self,
            InferenceError::UnknownClass { .. }
                | InferenceError::ClassCount { .. }
                | InferenceError::RowCount { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ArtifactLoad(#[from] ArtifactLoadError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write predictions: {0}")]
    Sink(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Short tag used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ArtifactLoad(_) => "artifact",
            Error::Schema(_) => "schema",
            Error::Inference(e) if e.is_artifact_drift() => "artifact_drift",
            Error::Inference(_) => "inference",
            Error::Io { .. } => "io",
            Error::Sink(_) => "sink",
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
