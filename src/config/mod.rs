//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files with environment variable
//! interpolation. A run needs at least one source and at least one
//! destination (HTTP delivery, file output, or both).

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyEndpointSnafu, EmptySourcePathSnafu, EmptySourcesSnafu,
    EnvInterpolationSnafu, NoDestinationSnafu, ReadFileSnafu, YamlParseSnafu, ZeroBatchSizeSnafu,
};

/// Main configuration structure for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source storage locations to scan for flow log blobs.
    pub sources: Vec<SourceConfig>,
    /// HTTP delivery destination (optional if `output` is set).
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,
    /// File output destination (optional if `delivery` is set).
    #[serde(default)]
    pub output: Option<OutputConfig>,
    /// Incremental processing behavior.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// One source storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Storage URL. Examples:
    /// "abfss://container@account.dfs.core.windows.net/prefix",
    /// "/local/path/to/blobs"
    pub url: String,
}

/// HTTP delivery destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Collector endpoint URL.
    pub endpoint: String,

    /// Optional bearer token sent in the Authorization header.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Maximum records per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Gzip request bodies (default: true).
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Retries per batch after the first attempt (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    1000
}

fn default_compress() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

/// File output destination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output file path, or "-" for stdout.
    pub path: String,

    /// Output serialization format.
    #[serde(default)]
    pub format: OutputFormat,
}

/// Serialization format for file output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One JSON array containing every record.
    #[default]
    Array,
    /// One JSON object per line.
    Ndjson,
}

/// Incremental processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Reprocess blobs regardless of their processed-state annotations.
    #[serde(default)]
    pub force_reprocess: bool,

    /// Prefix inside each source under which annotations are stored
    /// (default: "_squall").
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            force_reprocess: false,
            state_prefix: default_state_prefix(),
        }
    }
}

fn default_state_prefix() -> String {
    "_squall".to_string()
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            let result = vars::interpolate(&content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.sources.is_empty(), EmptySourcesSnafu);
        for source in &self.sources {
            ensure!(!source.url.is_empty(), EmptySourcePathSnafu);
        }
        ensure!(
            self.delivery.is_some() || self.output.is_some(),
            NoDestinationSnafu
        );
        if let Some(delivery) = &self.delivery {
            ensure!(!delivery.endpoint.is_empty(), EmptyEndpointSnafu);
            ensure!(delivery.batch_size > 0, ZeroBatchSizeSnafu);
        }
        Ok(())
    }
}
