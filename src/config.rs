use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::processor::{MissingPolicy, OutputFormat};

pub const DEFAULT_WATCH_DIR: &str = "/tmp/captures";
pub const DEFAULT_ARTIFACTS_DIR: &str = "/opt/ml";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Runtime settings for the classification pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub watch_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub poll_interval: Duration,
    pub extensions: Vec<String>,
    pub missing: MissingPolicy,
    /// `None` gates on the arg-max class.
    pub attack_threshold: Option<f32>,
    pub format: OutputFormat,
    pub once: bool,
    pub scan_on_start: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from(DEFAULT_WATCH_DIR),
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            poll_interval: DEFAULT_POLL_INTERVAL,
            extensions: vec!["csv".to_string()],
            missing: MissingPolicy::default(),
            attack_threshold: None,
            format: OutputFormat::default(),
            once: false,
            scan_on_start: false,
        }
    }
}

impl PipelineConfig {
    /// Startup checks; anything that fails here stops the process before
    /// artifacts are loaded.
    pub fn validate(&self) -> Result<()> {
        let dir = &self.watch_dir;
        let meta = fs::metadata(dir).map_err(|e| {
            Error::Config(format!("watch directory {} is not accessible: {e}", dir.display()))
        })?;
        if !meta.is_dir() {
            return Err(Error::Config(format!(
                "watch directory {} is not a directory",
                dir.display()
            )));
        }
        if meta.permissions().readonly() {
            return Err(Error::Config(format!(
                "watch directory {} is not writable",
                dir.display()
            )));
        }
        fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("watch directory {} cannot be listed: {e}", dir.display()))
        })?;

        if !self.artifacts_dir.is_dir() {
            return Err(Error::Config(format!(
                "artifact directory {} does not exist",
                self.artifacts_dir.display()
            )));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Config("polling interval must be positive".to_string()));
        }

        if self.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(Error::Config(
                "at least one file extension is required".to_string(),
            ));
        }

        if let Some(t) = self.attack_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return Err(Error::Config(format!(
                    "attack threshold {t} must lie in (0, 1]"
                )));
            }
        }

        Ok(())
    }
}
