//! Error types for squall using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during blob store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error"))]
    AzureConfig { source: object_store::Error },

    /// Local filesystem configuration error.
    #[snafu(display("Local filesystem configuration error"))]
    LocalConfig { source: object_store::Error },

    /// Failed to create a local storage directory.
    #[snafu(display("Failed to create local directory {path}"))]
    CreateDir {
        source: std::io::Error,
        path: String,
    },

    /// Annotation payload could not be serialized.
    #[snafu(display("Failed to serialize annotation for {path}"))]
    AnnotationSerialize {
        source: serde_json::Error,
        path: String,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if this error represents an authentication/authorization failure.
    ///
    /// Callers use this to distinguish "fix your credentials" from "retry
    /// later" when reporting source failures.
    pub fn is_auth(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => matches!(
                source,
                object_store::Error::Unauthenticated { .. }
                    | object_store::Error::PermissionDenied { .. }
            ),
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// No source accounts configured.
    #[snafu(display("At least one source must be configured"))]
    EmptySources,

    /// A source path is empty.
    #[snafu(display("Source path cannot be empty"))]
    EmptySourcePath,

    /// Neither a delivery endpoint nor an output path is configured.
    #[snafu(display("No destination configured: set delivery.endpoint and/or output.path"))]
    NoDestination,

    /// Delivery endpoint is empty.
    #[snafu(display("Delivery endpoint cannot be empty"))]
    EmptyEndpoint,

    /// Delivery batch size must be non-zero.
    #[snafu(display("Delivery batch_size must be greater than zero"))]
    ZeroBatchSize,

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Delivery Errors ============

/// Errors that can occur while building or using the delivery client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeliveryError {
    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build HTTP client"))]
    ClientBuild { source: reqwest::Error },

    /// Failed to serialize a batch of records.
    #[snafu(display("Failed to serialize record batch"))]
    BatchSerialize { source: serde_json::Error },

    /// Failed to gzip a serialized batch.
    #[snafu(display("Failed to compress record batch"))]
    BatchCompress { source: std::io::Error },

    /// The collector rejected the probe with an authorization failure.
    #[snafu(display("Collector rejected credentials (HTTP {status})"))]
    Unauthorized { status: u16 },

    /// The collector could not be reached or returned an unexpected status.
    #[snafu(display("Collector unreachable: {message}"))]
    Unreachable { message: String },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Pipeline Error (top-level) ============

/// Top-level pipeline errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    PipelineStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Delivery error.
    #[snafu(display("Delivery error"))]
    Delivery { source: DeliveryError },

    /// Failed to write flattened records to the output sink.
    #[snafu(display("Failed to write output to {path}"))]
    SinkWrite {
        source: std::io::Error,
        path: String,
    },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },
}

impl PipelineError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::PipelineStorage { source } => source.is_not_found(),
            _ => false,
        }
    }
}
