pub mod bundle;
pub mod labels;
pub mod scaler;

pub use bundle::{
    ArtifactBundle, BINARY_MODEL_STEM, DROPPED_COLUMNS_FILE, FEATURE_COLUMNS_FILE, LABELS_FILE,
    MULTI_MODEL_STEM, SCALER_FILE,
};
pub use labels::LabelVocabulary;
pub use scaler::MinMaxScaler;
