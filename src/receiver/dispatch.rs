//! Fans an export request out to the per-item callbacks.

use super::{Headers, LogCallback, ServerMeta, TraceCallback};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;

/// Invokes `cb` for every span in `request`, in wire order.
///
/// Returns `true` as soon as a callback asks to stop; remaining spans of the
/// request are not delivered.
pub fn dispatch_traces(
    cb: &TraceCallback,
    request: &ExportTraceServiceRequest,
    headers: &Headers,
    meta: &ServerMeta,
) -> bool {
    for resource_spans in &request.resource_spans {
        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                if cb(span, &span.events, resource_spans, headers, meta) {
                    return true;
                }
            }
        }
    }
    false
}

/// Invokes `cb` for every log record in `request`, in wire order.
pub fn dispatch_logs(
    cb: &LogCallback,
    request: &ExportLogsServiceRequest,
    headers: &Headers,
    meta: &ServerMeta,
) -> bool {
    for resource_logs in &request.resource_logs {
        for scope_logs in &resource_logs.scope_logs {
            for record in &scope_logs.log_records {
                if cb(record, resource_logs, headers, meta) {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs, ScopeLogs};
    use opentelemetry_proto::tonic::trace::v1::{span::Event, ResourceSpans, ScopeSpans, Span};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn span(name: &str) -> Span {
        Span {
            trace_id: vec![1; 16],
            span_id: vec![2; 8],
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn request(batches: Vec<Vec<Span>>) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                scope_spans: batches
                    .into_iter()
                    .map(|spans| ScopeSpans {
                        spans,
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }],
        }
    }

    fn recording(stop_at: Option<&'static str>) -> (TraceCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: TraceCallback = Arc::new(
            move |span: &Span, events: &[Event], _: &ResourceSpans, _: &Headers, meta: &ServerMeta| {
                assert!(events.is_empty());
                assert_eq!(meta.get("proto").map(String::as_str), Some("grpc"));
                sink.lock().push(span.name.clone());
                stop_at == Some(span.name.as_str())
            },
        );
        (cb, seen)
    }

    #[test]
    fn test_every_span_delivered_in_order() {
        let (cb, seen) = recording(None);
        let req = request(vec![vec![span("a"), span("b")], vec![span("c")]]);
        let meta = crate::receiver::server_meta(crate::receiver::Protocol::Grpc);

        assert!(!dispatch_traces(&cb, &req, &Headers::new(), &meta));
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_stop_short_circuits() {
        let (cb, seen) = recording(Some("b"));
        let req = request(vec![vec![span("a"), span("b")], vec![span("c")]]);
        let meta = crate::receiver::server_meta(crate::receiver::Protocol::Grpc);

        assert!(dispatch_traces(&cb, &req, &Headers::new(), &meta));
        assert_eq!(*seen.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_request_never_calls_back() {
        let (cb, seen) = recording(None);
        let meta = crate::receiver::server_meta(crate::receiver::Protocol::Grpc);
        assert!(!dispatch_traces(&cb, &ExportTraceServiceRequest::default(), &Headers::new(), &meta));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_logs_dispatch() {
        let count = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&count);
        let cb: LogCallback = Arc::new(move |_: &LogRecord, _: &ResourceLogs, _: &Headers, _: &ServerMeta| {
            *sink.lock() += 1;
            false
        });
        let req = ExportLogsServiceRequest {
            resource_logs: vec![ResourceLogs {
                scope_logs: vec![ScopeLogs {
                    log_records: vec![LogRecord::default(), LogRecord::default()],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };

        assert!(!dispatch_logs(&cb, &req, &Headers::new(), &ServerMeta::new()));
        assert_eq!(*count.lock(), 2);
    }
}
