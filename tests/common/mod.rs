//! Common test utilities and fixtures.

#![allow(dead_code)]

use codelens_lib::receiver::{Headers, ServerMeta, StopHook, TraceCallback};
use opentelemetry_proto::tonic::{
    collector::trace::v1::ExportTraceServiceRequest,
    common::v1::{any_value::Value, AnyValue, KeyValue},
    resource::v1::Resource,
    trace::v1::{span::Event, ResourceSpans, ScopeSpans, Span},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;

/// Test fixture builder for OTLP spans with sensible defaults.
pub struct TestSpanBuilder {
    trace_num: u8,
    span_num: u8,
    parent: Option<u8>,
    name: String,
    ended_ago: Duration,
    duration_ms: u64,
    attributes: Vec<KeyValue>,
    events: Vec<Event>,
}

impl TestSpanBuilder {
    pub fn new(trace_num: u8, span_num: u8) -> Self {
        Self {
            trace_num,
            span_num,
            parent: None,
            name: format!("operation-{}", span_num),
            ended_ago: Duration::ZERO,
            duration_ms: 100,
            attributes: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn parent(mut self, span_num: u8) -> Self {
        self.parent = Some(span_num);
        self
    }

    pub fn ended_ago(mut self, ago: Duration) -> Self {
        self.ended_ago = ago;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.push(string_kv(key, value));
        self
    }

    pub fn event(mut self, name: &str, attributes: &[(&str, &str)]) -> Self {
        self.events.push(Event {
            name: name.to_string(),
            attributes: attributes.iter().map(|(k, v)| string_kv(k, v)).collect(),
            ..Default::default()
        });
        self
    }

    pub fn build(self) -> Span {
        let end = SystemTime::now() - self.ended_ago;
        let start = end - Duration::from_millis(self.duration_ms);

        Span {
            trace_id: trace_id_bytes(self.trace_num),
            span_id: span_id_bytes(self.span_num),
            parent_span_id: self.parent.map(span_id_bytes).unwrap_or_default(),
            name: self.name,
            start_time_unix_nano: unix_nanos(start),
            end_time_unix_nano: unix_nanos(end),
            attributes: self.attributes,
            events: self.events,
            ..Default::default()
        }
    }
}

pub fn trace_id_bytes(num: u8) -> Vec<u8> {
    vec![num; 16]
}

pub fn span_id_bytes(num: u8) -> Vec<u8> {
    vec![num; 8]
}

/// Hex form of [`trace_id_bytes`]
pub fn trace_id_hex(num: u8) -> String {
    hex::encode(trace_id_bytes(num))
}

pub fn string_kv(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// One resource with one scope holding `spans`.
pub fn export_request(service: &str, spans: Vec<Span>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(Resource {
                attributes: vec![string_kv("service.name", service)],
                ..Default::default()
            }),
            scope_spans: vec![ScopeSpans {
                spans,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// What a recording callback saw for one span.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub span_name: String,
    pub service: String,
    pub headers: Headers,
    pub meta: ServerMeta,
}

/// Callback that records every span; asks to stop on a span named `stop`.
pub fn recording_callback() -> (TraceCallback, Arc<Mutex<Vec<Delivery>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let cb: TraceCallback = Arc::new(
        move |span: &Span, _: &[Event], resource: &ResourceSpans, headers: &Headers, meta: &ServerMeta| {
            let service = resource
                .resource
                .as_ref()
                .and_then(|r| r.attributes.iter().find(|kv| kv.key == "service.name"))
                .and_then(|kv| kv.value.as_ref())
                .and_then(|v| match &v.value {
                    Some(Value::StringValue(s)) => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            sink.lock().push(Delivery {
                span_name: span.name.clone(),
                service,
                headers: headers.clone(),
                meta: meta.clone(),
            });
            span.name == "stop"
        },
    );
    (cb, seen)
}

/// Stop hook that counts its invocations.
pub fn counting_hook() -> (StopHook, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let hook: StopHook = Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (hook, count)
}

/// Listener on an ephemeral localhost port.
pub async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
