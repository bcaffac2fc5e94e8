//! Incremental-processing state tracking.
//!
//! A blob is marked processed by writing an advisory annotation next to
//! it in the source store. The gate compares the blob's last-modified
//! timestamp against the annotation to decide whether a run needs to
//! (re)process it, so repeated invocations are cheap and safe. Losing an
//! annotation only costs a reprocess, never output correctness.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, warn};

use crate::emit;
use crate::error::StorageError;
use crate::metrics::events::{AnnotationWriteFailed, BlobSkipped};

/// Annotation key: when this tool last processed the blob.
pub const META_LAST_PROCESSED: &str = "lastProcessed";
/// Annotation key: the blob's last-modified timestamp at processing time.
pub const META_SOURCE_LAST_MODIFIED: &str = "processedBlobLastModified";
/// Annotation key: number of flat records produced from the blob.
pub const META_RECORD_COUNT: &str = "recordCount";
/// Annotation key: fixed identifier of the processor that wrote the annotation.
pub const META_PROCESSED_BY: &str = "processedBy";
/// Value written under [`META_PROCESSED_BY`].
pub const PROCESSED_BY_TAG: &str = "squall";

/// Raw annotation content as stored in the blob store.
pub type BlobMetadata = HashMap<String, String>;

/// Narrow capability for reading and writing per-blob annotations.
///
/// The gate consumes this capability; it never owns the blob itself.
pub trait AnnotationStore {
    /// Read the annotation for a blob, `None` if absent.
    fn annotation(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<BlobMetadata>, StorageError>> + Send;

    /// Overwrite the annotation for a blob.
    fn set_annotation(
        &self,
        path: &str,
        metadata: BlobMetadata,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Processed-state annotation for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRecord {
    pub last_processed: DateTime<Utc>,
    pub source_last_modified: DateTime<Utc>,
    pub record_count: usize,
}

impl ProcessingRecord {
    /// Build the annotation to persist after a successful processing pass.
    pub fn build(
        blob_last_modified: DateTime<Utc>,
        record_count: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            last_processed: now,
            source_last_modified: blob_last_modified,
            record_count,
        }
    }

    /// Serialize to the wire key/value form.
    ///
    /// Timestamps keep their full precision so the stored value round
    /// trips exactly against the blob's last-modified time.
    pub fn to_metadata(&self) -> BlobMetadata {
        let mut meta = BlobMetadata::new();
        meta.insert(
            META_LAST_PROCESSED.to_string(),
            self.last_processed.to_rfc3339(),
        );
        meta.insert(
            META_SOURCE_LAST_MODIFIED.to_string(),
            self.source_last_modified.to_rfc3339(),
        );
        meta.insert(META_RECORD_COUNT.to_string(), self.record_count.to_string());
        meta.insert(META_PROCESSED_BY.to_string(), PROCESSED_BY_TAG.to_string());
        meta
    }
}

/// Parse the processed-at-source timestamp out of a stored annotation.
///
/// Returns `None` for absent or unparsable values; callers treat that as
/// "never processed".
fn processed_last_modified(metadata: &BlobMetadata) -> Option<DateTime<Utc>> {
    let raw = metadata.get(META_SOURCE_LAST_MODIFIED)?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            warn!("Unparsable {META_SOURCE_LAST_MODIFIED} annotation ({raw}): {e}");
            None
        }
    }
}

/// Decide whether a blob requires processing.
///
/// `force` short-circuits everything. Otherwise a blob is processed when
/// no valid annotation exists or when it has been modified strictly after
/// the annotated timestamp; an equal timestamp means already processed,
/// so metadata-preserving copies do not trigger reprocessing.
pub fn should_process(
    blob_last_modified: DateTime<Utc>,
    stored_metadata: Option<&BlobMetadata>,
    force: bool,
) -> bool {
    if force {
        return true;
    }
    match stored_metadata.and_then(processed_last_modified) {
        Some(processed_at) => blob_last_modified > processed_at,
        None => true,
    }
}

/// Gate wiring [`should_process`] to an [`AnnotationStore`].
pub struct StateGate<'a, S> {
    store: &'a S,
    force_reprocess: bool,
}

impl<'a, S: AnnotationStore> StateGate<'a, S> {
    pub fn new(store: &'a S, force_reprocess: bool) -> Self {
        Self {
            store,
            force_reprocess,
        }
    }

    /// Check whether a blob needs processing this run.
    ///
    /// Annotation read failures fail open toward reprocessing.
    pub async fn requires_processing(&self, path: &str, last_modified: DateTime<Utc>) -> bool {
        let metadata = match self.store.annotation(path).await {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Failed to read annotation for {path}, reprocessing: {e}");
                None
            }
        };

        let required = should_process(last_modified, metadata.as_ref(), self.force_reprocess);
        if !required {
            debug!("Skipping {path}: unchanged since last processing");
            emit!(BlobSkipped);
        }
        required
    }

    /// Persist the processed annotation after a successful pass.
    ///
    /// A write failure is logged and swallowed: the records are already
    /// produced, and the only cost is a future reprocess.
    pub async fn mark_processed(
        &self,
        path: &str,
        last_modified: DateTime<Utc>,
        record_count: usize,
    ) -> bool {
        let record = ProcessingRecord::build(last_modified, record_count, Utc::now());
        match self.store.set_annotation(path, record.to_metadata()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to write annotation for {path} (will reprocess next run): {e}");
                emit!(AnnotationWriteFailed);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn meta_with_processed_at(value: &str) -> BlobMetadata {
        let mut meta = BlobMetadata::new();
        meta.insert(META_SOURCE_LAST_MODIFIED.to_string(), value.to_string());
        meta
    }

    #[test]
    fn test_absent_metadata_requires_processing() {
        assert!(should_process(ts(1_700_000_000), None, false));
    }

    #[test]
    fn test_equal_timestamp_skips() {
        let record = ProcessingRecord::build(ts(1_700_000_000), 10, ts(1_700_000_500));
        let meta = record.to_metadata();
        assert!(!should_process(ts(1_700_000_000), Some(&meta), false));
    }

    #[test]
    fn test_newer_blob_requires_processing() {
        let record = ProcessingRecord::build(ts(1_700_000_000), 10, ts(1_700_000_500));
        let meta = record.to_metadata();
        assert!(should_process(ts(1_700_000_001), Some(&meta), false));
    }

    #[test]
    fn test_older_blob_skips() {
        let record = ProcessingRecord::build(ts(1_700_000_000), 10, ts(1_700_000_500));
        let meta = record.to_metadata();
        assert!(!should_process(ts(1_699_999_999), Some(&meta), false));
    }

    #[test]
    fn test_force_overrides_everything() {
        let record = ProcessingRecord::build(ts(1_700_000_000), 10, ts(1_700_000_500));
        let meta = record.to_metadata();
        assert!(should_process(ts(1_700_000_000), Some(&meta), true));
        assert!(should_process(ts(1_700_000_000), None, true));

        let corrupt = meta_with_processed_at("not-a-timestamp");
        assert!(should_process(ts(1_700_000_000), Some(&corrupt), true));
    }

    #[test]
    fn test_corrupt_metadata_fails_open() {
        let corrupt = meta_with_processed_at("yesterday-ish");
        assert!(should_process(ts(1_700_000_000), Some(&corrupt), false));

        // Missing the key entirely also fails open.
        let mut incomplete = BlobMetadata::new();
        incomplete.insert(META_RECORD_COUNT.to_string(), "5".to_string());
        assert!(should_process(ts(1_700_000_000), Some(&incomplete), false));
    }

    #[test]
    fn test_metadata_round_trip() {
        let record = ProcessingRecord::build(ts(1_700_000_000), 42, ts(1_700_000_500));
        let meta = record.to_metadata();

        assert_eq!(meta.get(META_RECORD_COUNT).unwrap(), "42");
        assert_eq!(meta.get(META_PROCESSED_BY).unwrap(), PROCESSED_BY_TAG);
        assert_eq!(
            processed_last_modified(&meta).unwrap(),
            ts(1_700_000_000)
        );
    }

    /// In-memory annotation store for gate tests.
    #[derive(Default)]
    struct MemoryStore {
        annotations: Mutex<HashMap<String, BlobMetadata>>,
        fail_reads: bool,
        fail_writes: bool,
    }

    impl AnnotationStore for MemoryStore {
        async fn annotation(&self, path: &str) -> Result<Option<BlobMetadata>, StorageError> {
            if self.fail_reads {
                return Err(StorageError::InvalidUrl {
                    url: path.to_string(),
                });
            }
            Ok(self.annotations.lock().unwrap().get(path).cloned())
        }

        async fn set_annotation(
            &self,
            path: &str,
            metadata: BlobMetadata,
        ) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::InvalidUrl {
                    url: path.to_string(),
                });
            }
            self.annotations
                .lock()
                .unwrap()
                .insert(path.to_string(), metadata);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_gate_marks_then_skips() {
        let store = MemoryStore::default();
        let gate = StateGate::new(&store, false);

        assert!(gate.requires_processing("a.json", ts(100)).await);
        assert!(gate.mark_processed("a.json", ts(100), 7).await);
        assert!(!gate.requires_processing("a.json", ts(100)).await);
        assert!(gate.requires_processing("a.json", ts(101)).await);
    }

    #[tokio::test]
    async fn test_gate_overwrites_annotation() {
        let store = MemoryStore::default();
        let gate = StateGate::new(&store, false);

        gate.mark_processed("a.json", ts(100), 7).await;
        gate.mark_processed("a.json", ts(200), 9).await;

        let meta = store.annotation("a.json").await.unwrap().unwrap();
        assert_eq!(meta.get(META_RECORD_COUNT).unwrap(), "9");
        assert_eq!(processed_last_modified(&meta).unwrap(), ts(200));
        assert!(!gate.requires_processing("a.json", ts(200)).await);
    }

    #[tokio::test]
    async fn test_gate_read_failure_fails_open() {
        let store = MemoryStore {
            fail_reads: true,
            ..MemoryStore::default()
        };
        let gate = StateGate::new(&store, false);
        assert!(gate.requires_processing("a.json", ts(100)).await);
    }

    #[tokio::test]
    async fn test_gate_write_failure_is_non_fatal() {
        let store = MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        };
        let gate = StateGate::new(&store, false);
        assert!(!gate.mark_processed("a.json", ts(100), 7).await);
    }

    #[tokio::test]
    async fn test_gate_force_reprocess() {
        let store = MemoryStore::default();
        let gate = StateGate::new(&store, true);

        gate.mark_processed("a.json", ts(100), 7).await;
        assert!(gate.requires_processing("a.json", ts(100)).await);
    }
}
