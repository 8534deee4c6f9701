//! SegStore Rebalancer Daemon
//!
//! Keeps the shares of a segmented store above their free-space threshold,
//! evacuates withdrawn shares and selects archive batches on a schedule.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use segstore_rebalancer::{metrics, SchedulerConfig, SchedulerService};

#[derive(Parser)]
#[command(name = "segstore-rebalancer")]
#[command(about = "Share balancing and archive scheduling for segmented data set stores")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "SEGSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Store root holding the numbered share directories
    #[arg(long)]
    store_root: Option<PathBuf>,

    /// JSON catalog snapshot
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Plan relocations without executing them
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory for daily rotated log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Console logging plus an optional log file. The guard flushes the file on drop.
fn setup_logging(cli: &Cli) -> Option<WorkerGuard> {
    let mut guard = None;
    let mut layers: Vec<Box<dyn tracing_subscriber::layer::Layer<Registry> + Send + Sync>> =
        vec![Box::new(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(env_filter(cli.verbose)),
        )];

    if let Some(log_dir) = &cli.log_dir {
        let appender = tracing_appender::rolling::daily(log_dir, "segstore-rebalancer.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        layers.push(Box::new(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(env_filter(cli.verbose)),
        ));
    }

    tracing_subscriber::registry().with(layers).init();
    guard
}

fn load_config(cli: &Cli) -> anyhow::Result<SchedulerConfig> {
    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SchedulerConfig::default(),
    };
    let config = config.with_env_overrides().with_overrides(
        cli.store_root.clone(),
        cli.catalog.clone(),
        cli.dry_run,
        cli.metrics_port,
    );
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_logging(&cli);

    let config = load_config(&cli)?;
    info!(
        store = ?config.store.root,
        catalog = ?config.store.catalog,
        scan_interval = config.scan_interval_secs,
        dry_run = config.balancing.dry_run,
        "Starting SegStore rebalancer"
    );

    if config.metrics.enabled {
        metrics::install_exporter(config.metrics.port)
            .context("Failed to start metrics exporter")?;
    }

    let service =
        SchedulerService::from_config(config).context("Failed to set up scheduler service")?;

    if cli.once {
        let report = service.tick().await.context("Tick failed")?;
        info!(summary = %report.summary(), "Single tick finished");
        return Ok(());
    }

    service.run().await
}
