//! Flow log document model.
//!
//! Mirrors the nested JSON shape emitted by the network watcher:
//! a document holds records, records hold rule groups (`flows`), rule
//! groups hold device groups (`flowGroups`), and device groups hold
//! comma-delimited flow tuples. Deserialization is deliberately lenient:
//! a missing or null collection anywhere in the tree degrades to empty
//! rather than failing the whole blob.

mod denormalize;

pub use denormalize::{denormalize, parse_tuple};

use serde::{Deserialize, Deserializer, Serialize};

/// Treat explicit JSON `null` the same as an absent field.
fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One input unit containing zero or more log records.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogDocument {
    #[serde(default, deserialize_with = "null_default")]
    pub records: Vec<LogRecord>,
}

/// A single log record with optional nested flow data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default, deserialize_with = "null_default")]
    pub time: String,
    #[serde(default, deserialize_with = "null_default")]
    pub category: String,
    #[serde(default, deserialize_with = "null_default")]
    pub operation_name: String,
    #[serde(default, deserialize_with = "null_default")]
    pub resource_id: String,
    #[serde(default)]
    pub properties: Option<RecordProperties>,
    #[serde(default)]
    pub flow_records: Option<FlowSection>,
}

impl LogRecord {
    /// Schema version for this record; absent means version 1.
    pub fn version(&self) -> u32 {
        self.properties
            .as_ref()
            .and_then(|p| p.version)
            .unwrap_or(1)
    }
}

/// Record-level properties carrying the schema version.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordProperties {
    #[serde(rename = "Version", default)]
    pub version: Option<u32>,
}

/// Nested flow section of a record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowSection {
    #[serde(default, deserialize_with = "null_default")]
    pub flows: Vec<RuleGroup>,
}

/// Flows grouped under one security rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleGroup {
    #[serde(default, deserialize_with = "null_default")]
    pub rule: String,
    #[serde(rename = "flowGroups", default, deserialize_with = "null_default")]
    pub flow_groups: Vec<DeviceGroup>,
}

/// Flow tuples observed on one device (MAC).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceGroup {
    #[serde(default, deserialize_with = "null_default")]
    pub mac: String,
    #[serde(rename = "flowTuples", default, deserialize_with = "null_default")]
    pub flow_tuples: Vec<String>,
}

/// One denormalized output row, one per flow tuple.
///
/// Field names are part of the wire contract and must not change. The
/// version-2 fields are `None` for version-1 records and are omitted from
/// serialized output entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRecord {
    pub time: String,
    pub category: String,
    pub operation_name: String,
    pub resource_id: String,
    pub version: u32,
    pub nsg_rule_name: String,
    pub mac: String,
    pub start_time: String,
    pub source_address: String,
    pub destination_address: String,
    pub source_port: String,
    pub destination_port: String,
    pub transport_protocol: String,
    pub device_direction: String,
    pub device_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_state: Option<String>,
    #[serde(rename = "packetsStoD", skip_serializing_if = "Option::is_none")]
    pub packets_s_to_d: Option<String>,
    #[serde(rename = "bytesStoD", skip_serializing_if = "Option::is_none")]
    pub bytes_s_to_d: Option<String>,
    #[serde(rename = "packetsDtoS", skip_serializing_if = "Option::is_none")]
    pub packets_d_to_s: Option<String>,
    #[serde(rename = "bytesDtoS", skip_serializing_if = "Option::is_none")]
    pub bytes_d_to_s: Option<String>,
}
