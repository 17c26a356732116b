pub mod aligner;
pub mod engine;
pub mod publisher;
pub mod reader;

pub use aligner::{align, drop_columns, normalize_missing, project, FeatureAligner, MissingPolicy};
pub use engine::{CycleSummary, FileReport, IngestionLoop, LoopState};
pub use publisher::{OutputFormat, PredictionSink, WriterSink};
pub use reader::read_flow_file;
