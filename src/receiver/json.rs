//! OTLP/JSON decoding.
//!
//! Follows the protobuf JSON mapping used by OTLP exporters: ids are hex
//! strings, 64-bit integers may arrive as strings or numbers, field names are
//! lowerCamelCase. Unknown fields are ignored.

use crate::core::{CodelensError, Result};
use opentelemetry_proto::tonic::{
    collector::logs::v1::ExportLogsServiceRequest,
    collector::trace::v1::ExportTraceServiceRequest,
    common::v1::{any_value, AnyValue, ArrayValue, InstrumentationScope, KeyValue, KeyValueList},
    logs::v1::{LogRecord, ResourceLogs, ScopeLogs},
    resource::v1::Resource,
    trace::v1::{span::Event, ResourceSpans, ScopeSpans, Span},
};
use serde_json::Value;

/// Decodes an OTLP/JSON trace export body.
pub fn decode_trace_request(body: &[u8]) -> Result<ExportTraceServiceRequest> {
    let json: Value = serde_json::from_slice(body)?;

    let mut resource_spans = Vec::new();
    for resource_spans_json in array_field(&json, "resourceSpans") {
        let mut scope_spans = Vec::new();
        for scope_spans_json in array_field(resource_spans_json, "scopeSpans") {
            let spans = array_field(scope_spans_json, "spans")
                .iter()
                .map(json_to_span)
                .collect::<Result<Vec<_>>>()?;

            scope_spans.push(ScopeSpans {
                scope: scope_spans_json.get("scope").map(json_to_scope),
                spans,
                schema_url: string_field(scope_spans_json, "schemaUrl"),
            });
        }

        resource_spans.push(ResourceSpans {
            resource: resource_spans_json.get("resource").map(json_to_resource),
            scope_spans,
            schema_url: string_field(resource_spans_json, "schemaUrl"),
        });
    }

    Ok(ExportTraceServiceRequest { resource_spans })
}

/// Decodes an OTLP/JSON logs export body.
pub fn decode_logs_request(body: &[u8]) -> Result<ExportLogsServiceRequest> {
    let json: Value = serde_json::from_slice(body)?;

    let mut resource_logs = Vec::new();
    for resource_logs_json in array_field(&json, "resourceLogs") {
        let mut scope_logs = Vec::new();
        for scope_logs_json in array_field(resource_logs_json, "scopeLogs") {
            let log_records = array_field(scope_logs_json, "logRecords")
                .iter()
                .map(json_to_log_record)
                .collect::<Result<Vec<_>>>()?;

            scope_logs.push(ScopeLogs {
                scope: scope_logs_json.get("scope").map(json_to_scope),
                log_records,
                schema_url: string_field(scope_logs_json, "schemaUrl"),
            });
        }

        resource_logs.push(ResourceLogs {
            resource: resource_logs_json.get("resource").map(json_to_resource),
            scope_logs,
            schema_url: string_field(resource_logs_json, "schemaUrl"),
        });
    }

    Ok(ExportLogsServiceRequest { resource_logs })
}

fn json_to_span(span_json: &Value) -> Result<Span> {
    Ok(Span {
        trace_id: hex_field(span_json, "traceId")?,
        span_id: hex_field(span_json, "spanId")?,
        parent_span_id: hex_field(span_json, "parentSpanId")?,
        trace_state: string_field(span_json, "traceState"),
        name: string_field(span_json, "name"),
        kind: i64_field(span_json, "kind") as i32,
        start_time_unix_nano: u64_field(span_json, "startTimeUnixNano"),
        end_time_unix_nano: u64_field(span_json, "endTimeUnixNano"),
        attributes: json_to_attributes(span_json),
        events: array_field(span_json, "events")
            .iter()
            .map(|event_json| Event {
                time_unix_nano: u64_field(event_json, "timeUnixNano"),
                name: string_field(event_json, "name"),
                attributes: json_to_attributes(event_json),
                dropped_attributes_count: u64_field(event_json, "droppedAttributesCount") as u32,
            })
            .collect(),
        flags: u64_field(span_json, "flags") as u32,
        ..Default::default()
    })
}

fn json_to_log_record(record_json: &Value) -> Result<LogRecord> {
    Ok(LogRecord {
        time_unix_nano: u64_field(record_json, "timeUnixNano"),
        observed_time_unix_nano: u64_field(record_json, "observedTimeUnixNano"),
        severity_number: i64_field(record_json, "severityNumber") as i32,
        severity_text: string_field(record_json, "severityText"),
        body: record_json.get("body").map(json_to_any_value),
        attributes: json_to_attributes(record_json),
        flags: u64_field(record_json, "flags") as u32,
        trace_id: hex_field(record_json, "traceId")?,
        span_id: hex_field(record_json, "spanId")?,
        ..Default::default()
    })
}

fn json_to_resource(resource_json: &Value) -> Resource {
    Resource {
        attributes: json_to_attributes(resource_json),
        ..Default::default()
    }
}

fn json_to_scope(scope_json: &Value) -> InstrumentationScope {
    InstrumentationScope {
        name: string_field(scope_json, "name"),
        version: string_field(scope_json, "version"),
        attributes: json_to_attributes(scope_json),
        ..Default::default()
    }
}

/// Reads the `attributes` array of any OTLP object.
fn json_to_attributes(json: &Value) -> Vec<KeyValue> {
    json_to_key_values(json.get("attributes"))
}

fn json_to_key_values(json: Option<&Value>) -> Vec<KeyValue> {
    json.and_then(Value::as_array)
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|attr| {
                    let key = attr.get("key")?.as_str()?;
                    Some(KeyValue {
                        key: key.to_string(),
                        value: attr.get("value").map(json_to_any_value),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn json_to_any_value(value: &Value) -> AnyValue {
    use any_value::Value as V;

    let parsed = if let Some(s) = value.get("stringValue").and_then(Value::as_str) {
        Some(V::StringValue(s.to_string()))
    } else if let Some(b) = value.get("boolValue").and_then(Value::as_bool) {
        Some(V::BoolValue(b))
    } else if let Some(i) = value.get("intValue").and_then(json_i64) {
        Some(V::IntValue(i))
    } else if let Some(d) = value.get("doubleValue").and_then(json_f64) {
        Some(V::DoubleValue(d))
    } else if let Some(array) = value.get("arrayValue") {
        Some(V::ArrayValue(ArrayValue {
            values: array
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(json_to_any_value).collect())
                .unwrap_or_default(),
        }))
    } else if let Some(kvlist) = value.get("kvlistValue") {
        Some(V::KvlistValue(KeyValueList {
            values: json_to_key_values(kvlist.get("values")),
        }))
    } else {
        value
            .get("bytesValue")
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok())
            .map(V::BytesValue)
    };

    AnyValue { value: parsed }
}

fn array_field<'a>(json: &'a Value, key: &str) -> &'a [Value] {
    json.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn string_field(json: &Value, key: &str) -> String {
    json.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Absent ids decode to empty bytes; malformed hex is an error.
fn hex_field(json: &Value, key: &str) -> Result<Vec<u8>> {
    match json.get(key).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => {
            hex::decode(s).map_err(|e| CodelensError::decode(format!("invalid {key} {s:?}: {e}")))
        },
        _ => Ok(Vec::new()),
    }
}

fn u64_field(json: &Value, key: &str) -> u64 {
    json.get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0)
}

fn i64_field(json: &Value, key: &str) -> i64 {
    json.get(key).and_then(json_i64).unwrap_or(0)
}

fn json_i64(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn json_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}
