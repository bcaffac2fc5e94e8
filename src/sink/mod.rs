//! File output sink.
//!
//! Collects flat records across the whole run and writes them out once at
//! the end, either as a single JSON array or as NDJSON. The sink is the
//! secondary destination; HTTP delivery does not go through it.

use snafu::prelude::*;
use std::io::Write;
use tracing::info;

use crate::config::{OutputConfig, OutputFormat};
use crate::error::{PipelineError, SinkWriteSnafu};
use crate::flow::FlatRecord;

/// Accumulating writer for the configured output destination.
pub struct OutputSink {
    path: String,
    format: OutputFormat,
    records: Vec<FlatRecord>,
}

impl OutputSink {
    pub fn new(config: &OutputConfig) -> Self {
        Self {
            path: config.path.clone(),
            format: config.format,
            records: Vec::new(),
        }
    }

    /// Queue records for the final write.
    pub fn push_records(&mut self, records: &[FlatRecord]) {
        self.records.extend_from_slice(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write all queued records to the destination.
    ///
    /// A path of "-" writes to stdout. Returns the number of records
    /// written.
    pub fn finish(self) -> Result<usize, PipelineError> {
        let count = self.records.len();
        let body = self.serialize().context(SinkWriteSnafu {
            path: self.path.clone(),
        })?;

        if self.path == "-" {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&body).context(SinkWriteSnafu {
                path: self.path.clone(),
            })?;
        } else {
            std::fs::write(&self.path, &body).context(SinkWriteSnafu {
                path: self.path.clone(),
            })?;
            info!("Wrote {} records to {}", count, self.path);
        }

        Ok(count)
    }

    fn serialize(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self.format {
            OutputFormat::Array => {
                serde_json::to_writer_pretty(&mut out, &self.records)?;
                out.push(b'\n');
            }
            OutputFormat::Ndjson => {
                for record in &self.records {
                    serde_json::to_writer(&mut out, record)?;
                    out.push(b'\n');
                }
            }
        }
        Ok(out)
    }
}
