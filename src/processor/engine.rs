use crossbeam_channel::{select, tick, Receiver, TryRecvError};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactBundle;
use crate::classifier::CascadeClassifier;
use crate::error::{Error, Result};
use crate::types::{FlowPrediction, PipelineStats};

use super::aligner::FeatureAligner;
use super::publisher::PredictionSink;
use super::reader::read_flow_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Scanning,
    Reading,
    Aligning,
    Classifying,
    Reporting,
    Stopped,
}

/// Outcome of one successfully handled file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileReport {
    pub flows: usize,
    pub attacks: usize,
}

/// Totals for one scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleSummary {
    pub new_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub flows: usize,
    pub attacks: usize,
}

/// Polls a directory and classifies every capture file it has not seen yet.
///
/// Files are identified by name and claimed before they are read, so a file
/// that fails is never retried during this run.
pub struct IngestionLoop<S: PredictionSink> {
    watch_dir: PathBuf,
    extensions: Vec<String>,
    bundle: Arc<ArtifactBundle>,
    aligner: FeatureAligner,
    cascade: CascadeClassifier,
    sink: S,
    processed: HashSet<String>,
    state: LoopState,
    stats: PipelineStats,
    started: Instant,
}

impl<S: PredictionSink> IngestionLoop<S> {
    pub fn new(
        watch_dir: impl Into<PathBuf>,
        bundle: Arc<ArtifactBundle>,
        aligner: FeatureAligner,
        cascade: CascadeClassifier,
        sink: S,
    ) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            extensions: vec!["csv".to_string()],
            bundle,
            aligner,
            cascade,
            sink,
            processed: HashSet::new(),
            state: LoopState::Idle,
            stats: PipelineStats::default(),
            started: Instant::now(),
        }
    }

    pub fn with_extensions<I, T>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn processed(&self) -> &HashSet<String> {
        &self.processed
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            uptime_seconds: self.started.elapsed().as_secs(),
            ..self.stats.clone()
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Polls every `interval` until `shutdown` fires or disconnects. The
    /// signal is only observed between cycles, so an in-flight file always
    /// completes.
    pub fn run(&mut self, interval: Duration, scan_on_start: bool, shutdown: &Receiver<()>) {
        info!(
            "Monitoring {} every {:?} for new capture files",
            self.watch_dir.display(),
            interval
        );
        let poll_tick = tick(interval);

        if scan_on_start {
            self.poll_once();
        }

        loop {
            // A queued shutdown wins over a due tick.
            if shutdown_requested(shutdown) {
                break;
            }
            select! {
                recv(shutdown) -> _ => break,
                recv(poll_tick) -> _ => {
                    if shutdown_requested(shutdown) {
                        break;
                    }
                    self.poll_once();
                },
            }
        }

        self.state = LoopState::Stopped;
        let stats = self.stats();
        info!(
            files = stats.files_processed,
            failed = stats.files_failed,
            flows = stats.flows_classified,
            attacks = stats.attacks_detected,
            uptime_secs = stats.uptime_seconds,
            "Monitoring stopped"
        );
    }

    /// One `Idle -> Scanning -> ... -> Idle` pass over the directory.
    pub fn poll_once(&mut self) -> CycleSummary {
        self.state = LoopState::Scanning;
        let mut summary = CycleSummary::default();

        let new_files = match self.scan() {
            Ok(files) => files,
            Err(e) => {
                error!(error = %e, "Failed to scan watch directory");
                self.state = LoopState::Idle;
                return summary;
            }
        };
        summary.new_files = new_files.len();

        for name in new_files {
            // Claim first: a file is attempted at most once per run.
            if !self.processed.insert(name.clone()) {
                continue;
            }
            self.stats.files_processed += 1;

            match self.process_file(&name) {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.flows += report.flows;
                    summary.attacks += report.attacks;
                    self.stats.flows_classified += report.flows as u64;
                    self.stats.attacks_detected += report.attacks as u64;
                }
                Err(e) => {
                    summary.failed += 1;
                    self.stats.files_failed += 1;
                    match &e {
                        Error::Inference(_) | Error::Io { .. } | Error::Sink(_) => {
                            error!(file = %name, kind = e.kind(), error = %e, "Error processing file")
                        }
                        _ => warn!(file = %name, kind = e.kind(), error = %e, "Error processing file"),
                    }
                }
            }
        }

        if summary.new_files > 0 {
            info!(
                new_files = summary.new_files,
                succeeded = summary.succeeded,
                failed = summary.failed,
                flows = summary.flows,
                attacks = summary.attacks,
                "Scan cycle complete"
            );
        }
        self.state = LoopState::Idle;
        summary
    }

    /// Names of recognized files in the watch directory not yet processed,
    /// in lexical order.
    pub fn scan(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.watch_dir).map_err(|e| Error::io(&self.watch_dir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.watch_dir, e))?;
            let path = entry.path();
            if !path.is_file() || !self.is_recognized(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!("Skipping non UTF-8 file name {}", path.display());
                continue;
            };
            if !self.processed.contains(name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn is_recognized(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    fn process_file(&mut self, name: &str) -> Result<FileReport> {
        let path = self.watch_dir.join(name);

        self.state = LoopState::Reading;
        let batch = read_flow_file(&path)?;
        if batch.is_empty() {
            debug!(file = %name, "File has no flows");
            return Ok(FileReport::default());
        }
        let rows = batch.len();

        self.state = LoopState::Aligning;
        let aligned = self.aligner.align(batch, &self.bundle)?;

        self.state = LoopState::Classifying;
        let predictions = self.cascade.classify(&aligned, &self.bundle)?;

        self.state = LoopState::Reporting;
        let mut report = FileReport {
            flows: predictions.len(),
            attacks: 0,
        };
        debug_assert_eq!(rows, predictions.len());
        for (row, prediction) in predictions.into_iter().enumerate() {
            if !prediction.is_normal() {
                report.attacks += 1;
            }
            self.sink
                .publish(&FlowPrediction {
                    file: name.to_string(),
                    row,
                    label: prediction.label,
                    attack_probability: prediction.attack_probability,
                })
                .map_err(Error::Sink)?;
        }
        self.sink.flush().map_err(Error::Sink)?;

        debug!(file = %name, flows = report.flows, attacks = report.attacks, "File classified");
        Ok(report)
    }
}

fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}
