//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the pipeline.
//! Events implement the `InternalEvent` trait which emits the corresponding
//! Prometheus metric.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when flat records are produced from a blob.
pub struct RecordsFlattened {
    pub count: u64,
}

impl InternalEvent for RecordsFlattened {
    fn emit(self) {
        trace!(count = self.count, "Records flattened");
        counter!("squall_records_flattened_total").increment(self.count);
    }
}

/// Event emitted when blob bytes are read from a source.
pub struct BytesRead {
    pub bytes: u64,
}

impl InternalEvent for BytesRead {
    fn emit(self) {
        trace!(bytes = self.bytes, "Bytes read");
        counter!("squall_bytes_read_total").increment(self.bytes);
    }
}

/// Status of a processed blob.
#[derive(Debug, Clone, Copy)]
pub enum BlobStatus {
    Success,
    Failed,
}

impl BlobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            BlobStatus::Success => "success",
            BlobStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a source blob finishes processing.
pub struct BlobProcessed {
    pub status: BlobStatus,
}

impl InternalEvent for BlobProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Blob processed");
        counter!("squall_blobs_processed_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted when the state gate skips an unchanged blob.
pub struct BlobSkipped;

impl InternalEvent for BlobSkipped {
    fn emit(self) {
        trace!("Blob skipped");
        counter!("squall_blobs_skipped_total").increment(1);
    }
}

/// Event emitted when a processed-state annotation fails to persist.
pub struct AnnotationWriteFailed;

impl InternalEvent for AnnotationWriteFailed {
    fn emit(self) {
        trace!("Annotation write failed");
        counter!("squall_annotation_write_failures_total").increment(1);
    }
}

/// Final status of a delivered batch.
#[derive(Debug, Clone, Copy)]
pub enum BatchStatusLabel {
    Delivered,
    Exhausted,
    Rejected,
}

impl BatchStatusLabel {
    fn as_str(&self) -> &'static str {
        match self {
            BatchStatusLabel::Delivered => "delivered",
            BatchStatusLabel::Exhausted => "exhausted",
            BatchStatusLabel::Rejected => "rejected",
        }
    }
}

/// Event emitted when a batch delivery attempt concludes.
pub struct BatchDelivered {
    pub status: BatchStatusLabel,
    pub records: u64,
}

impl InternalEvent for BatchDelivered {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            records = self.records,
            "Batch delivery finished"
        );
        counter!("squall_batches_total", "status" => self.status.as_str()).increment(1);
        counter!("squall_batch_records_total", "status" => self.status.as_str())
            .increment(self.records);
    }
}

/// Event emitted before each delivery retry.
pub struct DeliveryRetry;

impl InternalEvent for DeliveryRetry {
    fn emit(self) {
        trace!("Delivery retry");
        counter!("squall_delivery_retries_total").increment(1);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    List,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::List => "list",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn from_result<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "squall_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}
