//! cellscore-annotate - Main entry point
//!
//! Scores every indexed cell image with the configured classifier and writes
//! the resulting confidence into the cell tables of each source directory.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use cellscore_annotate::services::{AnnotationDriver, SourceIndexer};
use cellscore_annotate::LinearClassifier;
use cellscore_common::config::{
    resolve_config_path, ActivationConfig, IdStrategy, LoggingConfig, ResizePolicy,
    UnclassifiedPolicy,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cellscore-annotate
#[derive(Parser, Debug)]
#[command(name = "cellscore-annotate")]
#[command(about = "Write classifier confidences into per-cell tables")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "CELLSCORE_CONFIG")]
    config: Option<PathBuf>,

    /// Resize policy override (0, 1 or 2)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
    stretch_level: Option<u8>,

    /// Unclassified image policy override (exclude, negative, positive, unlabeled)
    #[arg(long)]
    flag_unclassified: Option<UnclassifiedPolicy>,

    /// Cell id strategy override (direct, pairing)
    #[arg(long)]
    id_strategy: Option<IdStrategy>,

    /// Classify and merge, but do not save any table
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&LoggingConfig::default())?;
            error!("Could not load configuration file. Error: {:#}", e);
            return Ok(());
        }
    };
    init_tracing(&config.logging)?;

    info!("Starting cellscore-annotate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Sources: {}", config.sources.len());
    info!("Output tables: {}", config.out_path);

    let index = SourceIndexer::new(config.unclassified).index(&config.sources);

    let mut classifier = LinearClassifier::load(&config.model_path)
        .with_context(|| format!("Failed to load classifier {}", config.model_path.display()))?;

    let report = AnnotationDriver::from_config(&config)
        .dry_run(args.dry_run)
        .run(&index, &mut classifier)
        .context("Failed to save tables")?;

    info!(
        tables = report.tables,
        written = report.written.len(),
        skipped = report.stats.skipped,
        "Annotation complete"
    );
    Ok(())
}

/// Resolve, load and apply command-line overrides
fn load_config(args: &Args) -> Result<ActivationConfig> {
    let path = resolve_config_path(args.config.as_deref())?;
    let mut config = ActivationConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(level) = args.stretch_level {
        config.resize_policy = ResizePolicy::try_from(level).map_err(anyhow::Error::msg)?;
    }
    if let Some(policy) = args.flag_unclassified {
        config.unclassified = policy;
    }
    if let Some(strategy) = args.id_strategy {
        config.id_strategy = strategy;
    }
    Ok(config)
}

/// `RUST_LOG` wins over the configured level; a configured file replaces stderr
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;
    let registry = tracing_subscriber::registry().with(filter);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}
