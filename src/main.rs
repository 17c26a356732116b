use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowcascade::config::{PipelineConfig, DEFAULT_ARTIFACTS_DIR, DEFAULT_WATCH_DIR};
use flowcascade::processor::{MissingPolicy, OutputFormat};

#[derive(Parser, Debug)]
#[command(name = "flowcascade")]
#[command(about = "Classify network flow capture files with a binary gate and a multiclass model")]
#[command(version)]
struct Cli {
    /// Directory polled for new capture files
    #[arg(long, env = "FLOWCASCADE_WATCH_DIR", default_value = DEFAULT_WATCH_DIR)]
    watch_dir: PathBuf,

    /// Directory holding the trained artifact bundle
    #[arg(long, env = "FLOWCASCADE_ARTIFACTS", default_value = DEFAULT_ARTIFACTS_DIR)]
    artifacts: PathBuf,

    /// Seconds between directory scans
    #[arg(long, env = "FLOWCASCADE_INTERVAL_SECS", default_value_t = 10)]
    interval_secs: u64,

    /// Recognized capture file extensions
    #[arg(long, env = "FLOWCASCADE_EXTENSIONS", value_delimiter = ',', default_value = "csv")]
    extensions: Vec<String>,

    /// Handling of values still missing after alignment
    #[arg(long, env = "FLOWCASCADE_MISSING", value_enum, default_value_t = MissingPolicy::Reject)]
    missing: MissingPolicy,

    /// Flag a flow as attack when P(attack) reaches this value instead of by arg-max
    #[arg(long, env = "FLOWCASCADE_ATTACK_THRESHOLD")]
    attack_threshold: Option<f32>,

    /// Prediction output format
    #[arg(long, env = "FLOWCASCADE_FORMAT", value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Run a single scan and exit
    #[arg(long)]
    once: bool,

    /// Scan immediately instead of waiting for the first interval
    #[arg(long)]
    scan_on_start: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl From<Cli> for PipelineConfig {
    fn from(cli: Cli) -> Self {
        Self {
            watch_dir: cli.watch_dir,
            artifacts_dir: cli.artifacts,
            poll_interval: Duration::from_secs(cli.interval_secs),
            extensions: cli.extensions,
            missing: cli.missing,
            attack_threshold: cli.attack_threshold,
            format: cli.format,
            once: cli.once,
            scan_on_start: cli.scan_on_start,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries predictions.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = start(cli.into()) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn start(config: PipelineConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let stats = flowcascade::run(&config, &shutdown_rx)?;
    info!(
        files = stats.files_processed,
        failed = stats.files_failed,
        flows = stats.flows_classified,
        attacks = stats.attacks_detected,
        "Exiting"
    );
    Ok(())
}
