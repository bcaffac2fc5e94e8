//! Resilient batch delivery to an HTTP collector.
//!
//! Partitions flat records into bounded batches, serializes each batch to
//! a compact JSON array, optionally gzips the payload, and POSTs it with
//! bounded retries. Batches are independent units of work: one exhausted
//! or rejected batch never aborts the rest of the run, and the report
//! distinguishes "n of m batches failed" from total failure.

mod retry;

pub use retry::{classify_status, RetryPolicy, StatusClass};

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use snafu::prelude::*;
use std::future::Future;
use std::io::Write;
use tracing::{debug, warn};

use crate::config::DeliveryConfig;
use crate::emit;
use crate::error::{
    BatchCompressSnafu, BatchSerializeSnafu, ClientBuildSnafu, DeliveryError, UnauthorizedSnafu,
    UnreachableSnafu,
};
use crate::flow::FlatRecord;
use crate::metrics::events::{BatchDelivered, BatchStatusLabel, DeliveryRetry};

/// A transport-level failure (connect, timeout, DNS). Always retryable.
#[derive(Debug)]
pub struct TransportError {
    pub message: String,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Minimal send capability the delivery client runs on.
///
/// The production implementation is [`HttpTransport`]; tests substitute
/// scripted fakes so retry behavior can be exercised without a network.
pub trait Transport {
    /// Send one request; `body` is `None` for the connectivity probe.
    /// Returns the HTTP status code, or a transport error for failures
    /// below the HTTP layer.
    fn send(
        &self,
        body: Option<Bytes>,
        gzip: bool,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;
}

/// HTTP POST transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, body: Option<Bytes>, gzip: bool) -> Result<u16, TransportError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json");

        if let Some(token) = &self.bearer_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(body) = body {
            if gzip {
                request = request.header("Content-Encoding", "gzip");
            }
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| TransportError {
            message: e.to_string(),
        })?;
        Ok(response.status().as_u16())
    }
}

/// Final status of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Accepted by the collector.
    Delivered { attempts: u32 },
    /// Retry budget exhausted on retryable failures.
    Exhausted { attempts: u32, last_error: String },
    /// Terminal rejection (non-retryable status), not retried.
    Rejected { status: u16 },
}

impl BatchStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchStatus::Delivered { .. })
    }
}

/// Outcome of one batch within a delivery call.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Zero-based batch index within the call.
    pub index: usize,
    /// Number of records in the batch.
    pub records: usize,
    pub status: BatchStatus,
}

/// Per-batch outcomes for one delivery call.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub outcomes: Vec<BatchOutcome>,
}

impl DeliveryReport {
    pub fn total_batches(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed_batches(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .count()
    }

    pub fn failed_records(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !o.status.is_success())
            .map(|o| o.records)
            .sum()
    }

    pub fn all_delivered(&self) -> bool {
        self.failed_batches() == 0
    }
}

/// Batch delivery client, generic over the transport.
pub struct DeliveryClient<T> {
    transport: T,
    batch_size: usize,
    compress: bool,
    retry: RetryPolicy,
}

impl DeliveryClient<HttpTransport> {
    /// Build the production client from configuration.
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, DeliveryError> {
        Ok(Self::new(
            HttpTransport::new(config)?,
            config.batch_size,
            config.compress,
            RetryPolicy::with_max_retries(config.max_retries),
        ))
    }
}

impl<T: Transport> DeliveryClient<T> {
    pub fn new(transport: T, batch_size: usize, compress: bool, retry: RetryPolicy) -> Self {
        Self {
            transport,
            // chunks() panics on zero; config validation rejects it, but the
            // constructor is public
            batch_size: batch_size.max(1),
            compress,
            retry,
        }
    }

    /// Deliver all records in contiguous, order-preserving batches.
    ///
    /// Returns a per-batch report; serialization failures are the only
    /// hard error, everything transport-side ends up in the report.
    pub async fn deliver(&self, records: &[FlatRecord]) -> Result<DeliveryReport, DeliveryError> {
        let mut report = DeliveryReport::default();

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            let payload = self.encode(batch)?;
            debug!(
                "Sending batch {} ({} records, {} bytes{})",
                index,
                batch.len(),
                payload.len(),
                if self.compress { ", gzip" } else { "" }
            );

            let status = self.send_with_retry(payload).await;
            match &status {
                BatchStatus::Delivered { attempts } => {
                    debug!("Batch {index} delivered after {attempts} attempt(s)");
                    emit!(BatchDelivered {
                        status: BatchStatusLabel::Delivered,
                        records: batch.len() as u64,
                    });
                }
                BatchStatus::Exhausted {
                    attempts,
                    last_error,
                } => {
                    warn!("Batch {index} failed after {attempts} attempt(s): {last_error}");
                    emit!(BatchDelivered {
                        status: BatchStatusLabel::Exhausted,
                        records: batch.len() as u64,
                    });
                }
                BatchStatus::Rejected { status } => {
                    warn!("Batch {index} rejected with HTTP {status}, not retrying");
                    emit!(BatchDelivered {
                        status: BatchStatusLabel::Rejected,
                        records: batch.len() as u64,
                    });
                }
            }

            report.outcomes.push(BatchOutcome {
                index,
                records: batch.len(),
                status,
            });
        }

        Ok(report)
    }

    /// Probe the collector without transmitting any records.
    ///
    /// Sends a body-less request and classifies the result so callers can
    /// tell a credential problem from an unreachable endpoint.
    pub async fn probe(&self) -> Result<(), DeliveryError> {
        match self.transport.send(None, false).await {
            Ok(status) if (200..300).contains(&status) => Ok(()),
            Ok(status @ (401 | 403)) => UnauthorizedSnafu { status }.fail(),
            Ok(status) => UnreachableSnafu {
                message: format!("HTTP {status}"),
            }
            .fail(),
            Err(e) => UnreachableSnafu { message: e.message }.fail(),
        }
    }

    /// Serialize one batch as a compact JSON array, gzipped if configured.
    fn encode(&self, batch: &[FlatRecord]) -> Result<Bytes, DeliveryError> {
        let serialized = serde_json::to_vec(batch).context(BatchSerializeSnafu)?;
        if !self.compress {
            return Ok(Bytes::from(serialized));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serialized).context(BatchCompressSnafu)?;
        let compressed = encoder.finish().context(BatchCompressSnafu)?;
        Ok(Bytes::from(compressed))
    }

    /// Send one payload, retrying retryable failures with backoff.
    async fn send_with_retry(&self, payload: Bytes) -> BatchStatus {
        let mut last_error = String::new();

        for attempt in 0..self.retry.max_attempts() {
            if attempt > 0 {
                emit!(DeliveryRetry);
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            match self.transport.send(Some(payload.clone()), self.compress).await {
                Ok(status) => match classify_status(status) {
                    StatusClass::Success => {
                        return BatchStatus::Delivered {
                            attempts: attempt + 1,
                        };
                    }
                    StatusClass::Terminal => return BatchStatus::Rejected { status },
                    StatusClass::Retryable => {
                        last_error = format!("HTTP {status}");
                        debug!("Attempt {} got retryable {last_error}", attempt + 1);
                    }
                },
                Err(e) => {
                    last_error = e.message;
                    debug!("Attempt {} failed: {last_error}", attempt + 1);
                }
            }
        }

        BatchStatus::Exhausted {
            attempts: self.retry.max_attempts(),
            last_error,
        }
    }
}
