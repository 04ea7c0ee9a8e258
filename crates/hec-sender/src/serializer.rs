// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire encoding for collector events.
//!
//! Every record becomes one JSON object and a batch payload is those objects written back to back
//! with no separator, which is the framing the event endpoint accepts:
//!
//! ```text
//! {"time":"1700000000.123","index":"main","event":{"severity":"INFO","message":"hello"}}{"time":...}
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::error;

use crate::event::EventRecord;
use crate::metadata::Metadata;

#[derive(Serialize)]
struct WireEvent<'a> {
    time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sourcetype: Option<&'a str>,
    event: WireBody<'a>,
}

#[derive(Serialize)]
struct WireBody<'a> {
    severity: &'a str,
    message: Message<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Message<'a> {
    Structured(Map<String, Value>),
    Text(&'a str),
}

/// Parses `message` as a JSON object. Anything else, including valid JSON that is not an object,
/// yields `None`.
pub fn try_parse_structured(message: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(message) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Formats an epoch timestamp with exactly three decimal digits
pub fn format_time(time: f64) -> String {
    format!("{time:.3}")
}

/// Serializes a single record into its wire object
pub fn serialize(record: &EventRecord, metadata: &Metadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(record.estimated_size() + 64);
    write_event(&mut out, record, metadata);
    out
}

/// Serializes a batch in insertion order
pub fn serialize_batch(records: &[EventRecord], metadata: &Metadata) -> Vec<u8> {
    let capacity = records
        .iter()
        .map(|r| r.estimated_size() + 64)
        .sum::<usize>();
    let mut out = Vec::with_capacity(capacity);
    for record in records {
        write_event(&mut out, record, metadata);
    }
    out
}

fn write_event(out: &mut Vec<u8>, record: &EventRecord, metadata: &Metadata) {
    let message = match try_parse_structured(record.message()) {
        Some(map) => Message::Structured(map),
        None => Message::Text(record.message()),
    };
    let event = WireEvent {
        time: format_time(record.time()),
        index: metadata.index(),
        source: metadata.source(),
        sourcetype: metadata.sourcetype(),
        event: WireBody {
            severity: record.severity(),
            message,
        },
    };
    append_object(out, &event);
}

/// Appends `value` as one JSON object. A value that fails to encode is logged and dropped
/// without leaving a partial object behind.
fn append_object<T: Serialize>(out: &mut Vec<u8>, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => out.extend_from_slice(&bytes),
        Err(e) => error!("Failed to serialize event, dropping it: {e}"),
    }
}
