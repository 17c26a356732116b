pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod error;
pub mod processor;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use tracing::info;

use artifacts::ArtifactBundle;
use classifier::{AttackGate, CascadeClassifier};
use config::PipelineConfig;
use processor::{FeatureAligner, IngestionLoop, WriterSink};
use types::PipelineStats;

pub use error::{Error, Result as PipelineResult};

/// Validates the configuration, loads the artifact bundle and runs the
/// ingestion loop until `shutdown` fires (or for a single cycle with `once`).
/// Predictions go to stdout.
pub fn run(config: &PipelineConfig, shutdown: &Receiver<()>) -> Result<PipelineStats> {
    config.validate().context("Startup validation failed")?;

    let bundle = ArtifactBundle::load(&config.artifacts_dir).with_context(|| {
        format!(
            "Failed to load artifacts from {}",
            config.artifacts_dir.display()
        )
    })?;

    let aligner = FeatureAligner::new(config.missing);
    let cascade = CascadeClassifier::new(AttackGate::from_threshold(config.attack_threshold));
    info!(
        missing = ?aligner.missing_policy(),
        gate = ?cascade.gate(),
        format = ?config.format,
        "Pipeline configured"
    );

    let mut ingestion = IngestionLoop::new(
        &config.watch_dir,
        Arc::new(bundle),
        aligner,
        cascade,
        WriterSink::stdout(config.format),
    )
    .with_extensions(&config.extensions);

    if config.once {
        let summary = ingestion.poll_once();
        info!(
            files = summary.new_files,
            failed = summary.failed,
            flows = summary.flows,
            "Single scan complete"
        );
    } else {
        ingestion.run(config.poll_interval, config.scan_on_start, shutdown);
    }

    Ok(ingestion.stats())
}
