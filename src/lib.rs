//! squall: a library for flattening and delivering network flow logs.
//!
//! This library provides components for reading nested NSG flow log blobs
//! from cloud storage, denormalizing their flow tuples into flat records,
//! and delivering those records in batches to an HTTP collector. Processed
//! blobs are tracked through advisory annotations so repeated runs only
//! handle new or modified blobs.
//!
//! # Example
//!
//! ```ignore
//! use squall::{Config, run_pipeline, error::PipelineError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let config = Config::from_file("config.yaml")?;
//!     let stats = run_pipeline(config, false).await?;
//!     println!("Flattened {} records", stats.records_flattened);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deliver;
pub mod error;
pub mod flow;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod state;
pub mod storage;

// Re-export main types
pub use config::Config;
pub use flow::{FlatRecord, LogDocument, denormalize};
pub use pipeline::{Pipeline, PipelineStats, run_pipeline};
pub use storage::{StorageProvider, StorageProviderRef};
