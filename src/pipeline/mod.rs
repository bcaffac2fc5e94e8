//! Main processing pipeline.
//!
//! Connects the storage, state, flattening, and delivery components into a
//! single run: list blobs per source, gate them against their processed
//! annotations, flatten the survivors, and fan the flat records out to the
//! configured destinations.
//!
//! Failures are isolated at two levels: a broken source does not stop the
//! other sources, and a broken blob does not stop the rest of its source.
//! A blob is only annotated as processed once its records have reached
//! every configured destination: delivery must accept all of its batches,
//! and when a file sink is configured the annotation additionally waits
//! for the final write, so a failed write leaves the blobs unannotated
//! and they are retried on the next run.

mod signal;

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::deliver::{DeliveryClient, HttpTransport};
use crate::emit;
use crate::error::{DeliverySnafu, PipelineError, StorageError};
use crate::flow::{LogDocument, denormalize};
use crate::metrics::events::{BlobProcessed, BlobStatus, BytesRead, RecordsFlattened};
use crate::sink::OutputSink;
use crate::state::StateGate;
use crate::storage::{BlobEntry, StorageProvider};

/// Statistics about the pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub blobs_processed: usize,
    pub blobs_skipped: usize,
    pub blobs_failed: usize,
    pub sources_failed: usize,
    pub records_flattened: usize,
    pub batches_delivered: usize,
    pub batches_failed: usize,
}

impl PipelineStats {
    /// True when every source and blob the run touched succeeded.
    pub fn is_clean(&self) -> bool {
        self.blobs_failed == 0 && self.sources_failed == 0 && self.batches_failed == 0
    }
}

/// An annotation held back until the sink write lands.
struct PendingAnnotation {
    storage: StorageProvider,
    path: String,
    last_modified: DateTime<Utc>,
    records: usize,
}

/// Main processing pipeline.
pub struct Pipeline {
    config: Config,
    delivery: Option<DeliveryClient<HttpTransport>>,
    sink: Option<OutputSink>,
    pending_annotations: Vec<PendingAnnotation>,
    stats: PipelineStats,
    dry_run: bool,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    /// Create a new pipeline from configuration.
    pub fn new(config: Config, dry_run: bool) -> Result<Self, PipelineError> {
        let delivery = match &config.delivery {
            Some(delivery_config) if !dry_run => {
                Some(DeliveryClient::from_config(delivery_config).context(DeliverySnafu)?)
            }
            _ => None,
        };
        let sink = config.output.as_ref().map(OutputSink::new);

        Ok(Self {
            config,
            delivery,
            sink,
            pending_annotations: Vec::new(),
            stats: PipelineStats::default(),
            dry_run,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run the pipeline over every configured source.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        info!(
            "Starting pipeline ({} sources{})",
            self.config.sources.len(),
            if self.dry_run { ", dry run" } else { "" }
        );

        self.probe_collector().await;

        let sources = self.config.sources.clone();
        for source in &sources {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping before {}", source.url);
                break;
            }
            if let Err(e) = self.process_source(&source.url).await {
                self.stats.sources_failed += 1;
                if e.is_auth() {
                    error!("Source {} failed authentication: {}", source.url, e);
                } else {
                    error!("Source {} failed: {}", source.url, e);
                }
            }
        }

        if let Some(sink) = self.sink.take() {
            if self.dry_run {
                info!("Dry run: would write {} records to output", sink.len());
            } else {
                // A failed write aborts here, leaving the held-back
                // annotations unwritten so the blobs are reprocessed.
                sink.finish()?;
            }
        }

        for pending in std::mem::take(&mut self.pending_annotations) {
            let gate = StateGate::new(&pending.storage, false);
            gate.mark_processed(&pending.path, pending.last_modified, pending.records)
                .await;
        }

        info!("Pipeline completed: {:?}", self.stats);
        Ok(self.stats.clone())
    }

    /// Request a graceful stop at the next blob boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Verify the collector is reachable before touching any source.
    ///
    /// A failed probe is only a warning: the per-batch retry logic still
    /// runs, and file output is unaffected.
    async fn probe_collector(&self) {
        let Some(client) = &self.delivery else {
            return;
        };
        match client.probe().await {
            Ok(()) => info!("Collector probe succeeded"),
            Err(e) => warn!("Collector probe failed, deliveries may not succeed: {e}"),
        }
    }

    /// Process every eligible blob in one source.
    async fn process_source(&mut self, url: &str) -> Result<(), StorageError> {
        let storage =
            StorageProvider::for_url(url, &self.config.processing.state_prefix).await?;
        let blobs = storage.list_blobs().await?;
        info!(
            "Source {}: {} candidate blobs",
            storage.canonical_url(),
            blobs.len()
        );

        for blob in blobs {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested, stopping mid-source");
                break;
            }
            self.process_blob(&storage, &blob).await;
        }

        Ok(())
    }

    /// Process a single blob: gate, fetch, flatten, deliver, annotate.
    ///
    /// All failures are absorbed into the stats; nothing here aborts the
    /// source.
    async fn process_blob(&mut self, storage: &StorageProvider, blob: &BlobEntry) {
        let gate = StateGate::new(storage, self.config.processing.force_reprocess);
        if !gate.requires_processing(&blob.path, blob.last_modified).await {
            self.stats.blobs_skipped += 1;
            return;
        }

        let bytes = match storage.get(&blob.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                // Deleted between list and get; treat as skipped
                warn!("Blob {} vanished before read, skipping", blob.path);
                self.stats.blobs_skipped += 1;
                return;
            }
            Err(e) => {
                warn!("Failed to read blob {}: {}", blob.path, e);
                self.record_blob_failure();
                return;
            }
        };
        emit!(BytesRead {
            bytes: bytes.len() as u64
        });

        let doc: LogDocument = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Blob {} is not a valid flow log document: {}", blob.path, e);
                self.record_blob_failure();
                return;
            }
        };

        let records = denormalize(&doc);
        self.stats.records_flattened += records.len();
        emit!(RecordsFlattened {
            count: records.len() as u64
        });
        info!("Flattened {}: {} records", blob.path, records.len());

        if self.dry_run {
            info!(
                "Dry run: would deliver {} records from {}",
                records.len(),
                blob.path
            );
            self.stats.blobs_processed += 1;
            return;
        }

        let mut fully_delivered = true;
        if let Some(client) = &self.delivery {
            match client.deliver(&records).await {
                Ok(report) => {
                    self.stats.batches_delivered +=
                        report.total_batches() - report.failed_batches();
                    self.stats.batches_failed += report.failed_batches();
                    if !report.all_delivered() {
                        warn!(
                            "Blob {}: {} of {} batches failed ({} records not delivered)",
                            blob.path,
                            report.failed_batches(),
                            report.total_batches(),
                            report.failed_records()
                        );
                        fully_delivered = false;
                    }
                }
                Err(e) => {
                    warn!("Blob {}: delivery failed: {}", blob.path, e);
                    fully_delivered = false;
                }
            }
        }

        if let Some(sink) = &mut self.sink {
            sink.push_records(&records);
        }

        if fully_delivered {
            // Only a fully delivered blob is annotated; partial deliveries
            // get retried wholesale on the next run. With a sink configured
            // the annotation is held back until the final write lands, so
            // queued records cannot be stranded by a failed write.
            if self.sink.is_some() {
                self.pending_annotations.push(PendingAnnotation {
                    storage: storage.clone(),
                    path: blob.path.clone(),
                    last_modified: blob.last_modified,
                    records: records.len(),
                });
            } else {
                gate.mark_processed(&blob.path, blob.last_modified, records.len())
                    .await;
            }
            self.stats.blobs_processed += 1;
            emit!(BlobProcessed {
                status: BlobStatus::Success
            });
        } else {
            self.record_blob_failure();
        }
    }

    fn record_blob_failure(&mut self) {
        self.stats.blobs_failed += 1;
        emit!(BlobProcessed {
            status: BlobStatus::Failed
        });
    }
}

/// Run the pipeline with the given configuration.
pub async fn run_pipeline(config: Config, dry_run: bool) -> Result<PipelineStats, PipelineError> {
    let mut pipeline = Pipeline::new(config, dry_run)?;

    // Set up signal handler for graceful shutdown
    let shutdown = pipeline.shutdown_handle();
    tokio::spawn(async move {
        signal::shutdown_signal().await;
        shutdown.store(true, Ordering::Relaxed);
    });

    pipeline.run().await
}
