//! Tuple denormalization.
//!
//! Turns one nested log document into a flat record per flow tuple.
//! This is a pure transform: no I/O, no failure path for well-typed
//! input. Traversal order (records, then rules, then device groups, then
//! tuples) is preserved exactly so repeated runs over the same blob
//! produce byte-identical output.

use super::{FlatRecord, LogDocument, LogRecord};

/// Positional index of the first version-2 field in a flow tuple.
const V2_FIELDS_START: usize = 8;

/// Flatten every flow tuple in the document into one record each.
///
/// Records without a flow section contribute nothing. The schema version
/// is read once per log record and applied to every tuple under it.
pub fn denormalize(doc: &LogDocument) -> Vec<FlatRecord> {
    let mut out = Vec::new();

    for record in &doc.records {
        let Some(section) = &record.flow_records else {
            continue;
        };
        let version = record.version();

        for rule_group in &section.flows {
            for device_group in &rule_group.flow_groups {
                for tuple in &device_group.flow_tuples {
                    out.push(parse_tuple(
                        record,
                        version,
                        &rule_group.rule,
                        &device_group.mac,
                        tuple,
                    ));
                }
            }
        }
    }

    out
}

/// Build one flat record from a comma-delimited flow tuple.
///
/// Fields beyond the tuple's actual length are treated as absent (empty
/// string), never as an error. For version >= 2, the numeric counters
/// default to "0" when absent while `flowState` is carried verbatim; for
/// version 1 all five version-2 fields are omitted.
pub fn parse_tuple(
    record: &LogRecord,
    version: u32,
    rule: &str,
    mac: &str,
    tuple: &str,
) -> FlatRecord {
    let parts: Vec<&str> = tuple.split(',').collect();
    let field = |i: usize| parts.get(i).copied().unwrap_or("").to_string();
    let numeric = |i: usize| {
        let value = field(i);
        if value.is_empty() {
            "0".to_string()
        } else {
            value
        }
    };

    let v2 = version >= 2;
    FlatRecord {
        time: record.time.clone(),
        category: record.category.clone(),
        operation_name: record.operation_name.clone(),
        resource_id: record.resource_id.clone(),
        version,
        nsg_rule_name: rule.to_string(),
        mac: mac.to_string(),
        start_time: field(0),
        source_address: field(1),
        destination_address: field(2),
        source_port: field(3),
        destination_port: field(4),
        transport_protocol: field(5),
        device_direction: field(6),
        device_action: field(7),
        flow_state: v2.then(|| field(V2_FIELDS_START)),
        packets_s_to_d: v2.then(|| numeric(9)),
        bytes_s_to_d: v2.then(|| numeric(10)),
        packets_d_to_s: v2.then(|| numeric(11)),
        bytes_d_to_s: v2.then(|| numeric(12)),
    }
}
