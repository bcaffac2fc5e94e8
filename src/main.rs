//! squall: a standalone tool for flattening and delivering network flow logs.
//!
//! This tool reads nested NSG flow log blobs from Azure Blob Storage or the
//! local filesystem, denormalizes their flow tuples into flat records, and
//! delivers the records in gzipped batches to an HTTP collector (and/or a
//! local file). Blobs already processed are skipped via advisory
//! annotations stored next to the source data.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use squall::config::Config;
use squall::deliver::DeliveryClient;
use squall::error::{AddressParseSnafu, ConfigSnafu, DeliverySnafu, MetricsSnafu, PipelineError};
use squall::pipeline::run_pipeline;
use squall::{metrics, Pipeline};

/// Flow log flattening and delivery tool.
#[derive(Parser, Debug)]
#[command(name = "squall")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// List and flatten blobs without delivering, writing, or annotating.
    #[arg(long)]
    dry_run: bool,

    /// Validate configuration and collector connectivity, then exit.
    #[arg(long)]
    check: bool,

    /// Reprocess blobs regardless of their processed-state annotations.
    #[arg(long)]
    force_reprocess: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("squall starting");

    let mut config = Config::from_file(&args.config).context(ConfigSnafu)?;
    if args.force_reprocess {
        config.processing.force_reprocess = true;
    }

    if args.check {
        return check(&config).await;
    }

    // Initialize metrics if enabled
    if config.metrics.enabled && !args.dry_run {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    // Run the pipeline
    let stats = run_pipeline(config, args.dry_run).await?;

    info!("Run summary");
    info!("  Blobs processed: {}", stats.blobs_processed);
    info!("  Blobs skipped: {}", stats.blobs_skipped);
    info!("  Blobs failed: {}", stats.blobs_failed);
    info!("  Sources failed: {}", stats.sources_failed);
    info!("  Records flattened: {}", stats.records_flattened);
    info!("  Batches delivered: {}", stats.batches_delivered);
    info!("  Batches failed: {}", stats.batches_failed);

    Ok(())
}

/// Validate the configuration and probe the collector without processing.
async fn check(config: &Config) -> Result<(), PipelineError> {
    info!("Check mode - validating configuration");
    for source in &config.sources {
        info!("Source: {}", source.url);
    }
    if let Some(output) = &config.output {
        info!("Output: {} ({:?})", output.path, output.format);
    }

    if let Some(delivery_config) = &config.delivery {
        info!("Delivery endpoint: {}", delivery_config.endpoint);
        let client = DeliveryClient::from_config(delivery_config).context(DeliverySnafu)?;
        client.probe().await.context(DeliverySnafu)?;
        info!("Collector probe succeeded");
    }

    // Construction is enough to validate the pipeline wiring
    Pipeline::new(config.clone(), true)?;
    info!("Configuration is valid");
    Ok(())
}
