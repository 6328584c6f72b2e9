//! Conversion from OTLP protobuf messages to the domain model.

use crate::core::{AttributeValue, Attributes, Resource, SpanEvent, SpanId, SpanRecord, TraceId};
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource as OtlpResource;
use opentelemetry_proto::tonic::trace::v1::{span::Event, Span};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Builds the domain record for one received span.
pub fn span_record_from_otlp(span: &Span, events: &[Event], resource: Option<&OtlpResource>) -> SpanRecord {
    SpanRecord {
        trace_id: TraceId::from_bytes(&span.trace_id),
        span_id: SpanId::from_bytes(&span.span_id),
        parent_span_id: SpanId::parent_from_bytes(&span.parent_span_id),
        name: span.name.clone(),
        start_time: nanos_to_system_time(span.start_time_unix_nano),
        end_time: nanos_to_system_time(span.end_time_unix_nano),
        attributes: attributes_from_otlp(&span.attributes),
        events: events.iter().map(event_from_otlp).collect(),
        resource: resource_from_otlp(resource),
    }
}

/// Converts one span event
pub fn event_from_otlp(event: &Event) -> SpanEvent {
    SpanEvent {
        name: event.name.clone(),
        time: nanos_to_system_time(event.time_unix_nano),
        attributes: attributes_from_otlp(&event.attributes),
    }
}

/// Converts the resource, defaulting the service name to `unknown`.
pub fn resource_from_otlp(resource: Option<&OtlpResource>) -> Resource {
    match resource {
        Some(resource) => Resource {
            service_name: extract_service_name(&resource.attributes),
            attributes: attributes_from_otlp(&resource.attributes),
        },
        None => Resource {
            service_name: "unknown".to_string(),
            attributes: Attributes::new(),
        },
    }
}

/// Keeps declaration order; attributes without a value are skipped.
pub fn attributes_from_otlp(attributes: &[KeyValue]) -> Attributes {
    attributes
        .iter()
        .filter_map(|kv| {
            kv.value
                .as_ref()
                .and_then(attribute_value_from_otlp)
                .map(|v| (kv.key.clone(), v))
        })
        .collect()
}

/// Scalar values map one to one; arrays, maps and bytes are flattened to text.
pub fn attribute_value_from_otlp(value: &AnyValue) -> Option<AttributeValue> {
    let value = value.value.as_ref()?;
    Some(match value {
        Value::StringValue(s) => AttributeValue::String(s.clone()),
        Value::BoolValue(b) => AttributeValue::Bool(*b),
        Value::IntValue(i) => AttributeValue::Int(*i),
        Value::DoubleValue(d) => AttributeValue::Double(*d),
        other => AttributeValue::Other(any_value_to_string(other)),
    })
}

/// Renders any OTLP value as display text, used for log bodies too.
pub fn any_value_to_string(value: &Value) -> String {
    match value {
        Value::StringValue(s) => s.clone(),
        Value::BoolValue(b) => b.to_string(),
        Value::IntValue(i) => i.to_string(),
        Value::DoubleValue(d) => d.to_string(),
        Value::ArrayValue(array) => {
            let items: Vec<String> = array
                .values
                .iter()
                .filter_map(|v| v.value.as_ref())
                .map(any_value_to_string)
                .collect();
            format!("[{}]", items.join(", "))
        },
        Value::KvlistValue(kvlist) => {
            let items: Vec<String> = kvlist
                .values
                .iter()
                .map(|kv| {
                    let v = kv
                        .value
                        .as_ref()
                        .and_then(|v| v.value.as_ref())
                        .map(any_value_to_string)
                        .unwrap_or_default();
                    format!("{}={}", kv.key, v)
                })
                .collect();
            format!("{{{}}}", items.join(", "))
        },
        Value::BytesValue(bytes) => hex::encode(bytes),
    }
}

/// `service.name` from resource attributes, or `unknown`.
pub fn extract_service_name(attributes: &[KeyValue]) -> String {
    attributes
        .iter()
        .find(|kv| kv.key == SERVICE_NAME)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match &v.value {
            Some(Value::StringValue(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Zero maps to the Unix epoch.
pub fn nanos_to_system_time(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}
