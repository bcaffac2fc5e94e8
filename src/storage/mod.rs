//! Blob storage abstraction.
//!
//! Provides a unified interface over Azure Blob Storage and the local
//! filesystem, plus the sidecar annotation store used for incremental
//! processing state. Annotations live under a reserved prefix inside the
//! same container as the source blobs, so no second storage account or
//! database is needed.

mod azure;
mod local;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{AnnotationSerializeSnafu, InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{RequestStatus, StorageOperation, StorageRequest};
use crate::state::{AnnotationStore, BlobMetadata};

pub use azure::AzureConfig;
pub use local::LocalConfig;

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

// URL patterns for the supported backends
const ABFS_URL: &str = r"^abfss?://(?P<container>[a-z0-9\-]+)@(?P<account>[a-z0-9]+)\.dfs\.core\.windows\.net(/(?P<key>.+))?$";
const AZURE_HTTPS: &str = r"^https://(?P<account>[a-z0-9]+)\.(blob|dfs)\.core\.windows\.net/(?P<container>[a-z0-9\-]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    Azure,
    Local,
}

fn matchers() -> &'static HashMap<Backend, Vec<Regex>> {
    static MATCHERS: OnceLock<HashMap<Backend, Vec<Regex>>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        let mut m = HashMap::new();

        m.insert(
            Backend::Azure,
            vec![
                Regex::new(ABFS_URL).unwrap(),
                Regex::new(AZURE_HTTPS).unwrap(),
            ],
        );

        m.insert(
            Backend::Local,
            vec![
                Regex::new(FILE_URI).unwrap(),
                Regex::new(FILE_URL).unwrap(),
                Regex::new(FILE_PATH).unwrap(),
            ],
        );

        m
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Azure(AzureConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (k, v) in matchers() {
            if let Some(matches) = v.iter().filter_map(|r| r.captures(url)).next() {
                return match k {
                    Backend::Azure => Self::parse_azure(matches),
                    Backend::Local => Self::parse_local(matches),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_azure(matches: regex::Captures) -> Result<Self, StorageError> {
        let container = matches
            .name("container")
            .expect("container should always be available")
            .as_str()
            .to_string();

        let account = matches
            .name("account")
            .expect("account should always be available")
            .as_str()
            .to_string();

        let key = matches.name("key").map(|r| r.as_str().into());

        Ok(BackendConfig::Azure(AzureConfig {
            account,
            container,
            key,
        }))
    }

    fn parse_local(matches: regex::Captures) -> Result<Self, StorageError> {
        let path = matches
            .name("path")
            .expect("path regex must contain a path group")
            .as_str();

        let path = if !path.starts_with('/') {
            format!("/{path}")
        } else {
            path.to_string()
        };

        Ok(BackendConfig::Local(LocalConfig { path, key: None }))
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::Azure(azure) => azure.key.as_ref(),
            BackendConfig::Local(local) => local.key.as_ref(),
        }
    }
}

/// A source blob eligible for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Path relative to the configured key prefix.
    pub path: String,
    pub last_modified: DateTime<Utc>,
}

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
    /// Prefix under which processed-state annotations are stored.
    state_prefix: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for the given URL.
    pub async fn for_url(url: &str, state_prefix: &str) -> Result<Self, StorageError> {
        let config = BackendConfig::parse_url(url)?;

        match config {
            BackendConfig::Azure(config) => Self::construct_azure(config, state_prefix).await,
            BackendConfig::Local(config) => Self::construct_local(config, state_prefix).await,
        }
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// List JSON blobs eligible for processing, sorted by path.
    ///
    /// Annotation sidecars under the state prefix are excluded, so the
    /// pipeline never tries to flatten its own state.
    pub async fn list_blobs(&self) -> Result<Vec<BlobEntry>, StorageError> {
        let result = self.list_blobs_inner().await;
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::from_result(&result),
        });
        result
    }

    async fn list_blobs_inner(&self) -> Result<Vec<BlobEntry>, StorageError> {
        let key_path: Option<Path> = self.config.key().cloned();
        let key_part_count = key_path
            .as_ref()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let mut blobs = Vec::new();
        let mut total_listed = 0;
        let mut stream = self.object_store.list(key_path.as_ref());

        while let Some(result) = stream.next().await {
            let meta = result.context(ObjectStoreSnafu)?;
            total_listed += 1;

            // Strip the prefix so callers get paths relative to the source root
            let relative: Path = meta.location.parts().skip(key_part_count).collect();
            let relative = relative.to_string();

            if relative.starts_with(&self.state_prefix) {
                continue;
            }
            if relative.ends_with(".json") {
                blobs.push(BlobEntry {
                    path: relative,
                    last_modified: meta.last_modified,
                });
            }
        }

        debug!(
            "Listed {} total objects, {} are .json blobs",
            total_listed,
            blobs.len()
        );

        // Sort by path for consistent ordering
        blobs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(blobs)
    }

    /// Get the contents of a blob.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let path = Path::from(path);
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(&path)).await;

        emit!(StorageRequest {
            operation: StorageOperation::Get,
            status: RequestStatus::from_result(&result),
        });
        debug!("Get {} took {:?}", path, start.elapsed());

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put bytes to a path.
    pub async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        let path = Path::from(path);
        let payload = PutPayload::from(Bytes::from(bytes));
        let result = self.object_store.put(&self.qualify_path(&path), payload).await;

        emit!(StorageRequest {
            operation: StorageOperation::Put,
            status: RequestStatus::from_result(&result),
        });

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Qualify a path with the configured key prefix.
    fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Sidecar path of the annotation for a source blob.
    fn annotation_path(&self, path: &str) -> String {
        format!("{}/{}.meta.json", self.state_prefix, path)
    }
}

impl AnnotationStore for StorageProvider {
    /// Read the annotation sidecar for a blob.
    ///
    /// An absent sidecar is the normal "never processed" case. A sidecar
    /// that fails to parse is treated the same way, the gate then fails
    /// open toward reprocessing.
    async fn annotation(&self, path: &str) -> Result<Option<BlobMetadata>, StorageError> {
        let sidecar = self.annotation_path(path);
        match self.get(&sidecar).await {
            Ok(bytes) => match serde_json::from_slice::<BlobMetadata>(&bytes) {
                Ok(metadata) => Ok(Some(metadata)),
                Err(e) => {
                    warn!("Corrupt annotation at {sidecar}, ignoring: {e}");
                    Ok(None)
                }
            },
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_annotation(&self, path: &str, metadata: BlobMetadata) -> Result<(), StorageError> {
        let sidecar = self.annotation_path(path);
        let bytes = serde_json::to_vec(&metadata).context(AnnotationSerializeSnafu {
            path: path.to_string(),
        })?;
        self.put(&sidecar, bytes).await
    }
}
