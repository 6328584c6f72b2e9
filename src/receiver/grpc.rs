//! OTLP/gRPC server.
//!
//! Serves `TraceService/Export` and `LogsService/Export` with tonic. Call
//! metadata is flattened into [`Headers`]; keys with several values are joined
//! as one CSV record.

use super::{
    dispatch_logs, dispatch_traces, server_meta, Headers, Lifecycle, LogCallback, OtlpServer,
    Protocol, StopHook, TraceCallback,
};
use crate::core::{CodelensError, Result};
use arc_swap::ArcSwapOption;
use opentelemetry_proto::tonic::collector::{
    logs::v1::{
        logs_service_server::{LogsService, LogsServiceServer},
        ExportLogsServiceRequest, ExportLogsServiceResponse,
    },
    trace::v1::{
        trace_service_server::{TraceService, TraceServiceServer},
        ExportTraceServiceRequest, ExportTraceServiceResponse,
    },
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::metadata::{KeyRef, MetadataMap};
use tonic::{transport::Server, Request, Response, Status};

/// OTLP/gRPC server
pub struct GrpcServer {
    shared: Arc<Shared>,
}

struct Shared {
    trace_callback: TraceCallback,
    log_callback: ArcSwapOption<LogCallback>,
    lifecycle: Arc<Lifecycle>,
}

impl Shared {
    /// A callback asked to stop; shut down without blocking the request.
    fn request_stop(&self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move { lifecycle.stop_wait().await });
    }
}

impl GrpcServer {
    /// Creates a server delivering spans to `cb`; `stop` runs once on shutdown.
    pub fn new(cb: TraceCallback, stop: StopHook) -> Self {
        Self {
            shared: Arc::new(Shared {
                trace_callback: cb,
                log_callback: ArcSwapOption::empty(),
                lifecycle: Arc::new(Lifecycle::new(stop)),
            }),
        }
    }

    /// Shared shutdown state
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }
}

#[async_trait::async_trait]
impl OtlpServer for GrpcServer {
    async fn listen_and_serve(&self, endpoint: &str) {
        let listener = match TcpListener::bind(endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to bind OTLP/gRPC listener on {}: {}", endpoint, e);
                std::process::exit(1);
            },
        };
        if let Err(e) = self.serve(listener).await {
            tracing::error!("OTLP/gRPC server failed: {}", e);
            std::process::exit(1);
        }
    }

    async fn serve(&self, listener: TcpListener) -> Result<()> {
        if !self.shared.lifecycle.enter_serve() {
            return Ok(());
        }

        match listener.local_addr() {
            Ok(addr) => tracing::info!("OTLP/gRPC receiver listening on {}", addr),
            Err(e) => tracing::warn!("OTLP/gRPC receiver started, local address unknown: {}", e),
        }

        let result = Server::builder()
            .add_service(TraceServiceServer::new(GrpcTraceService {
                shared: Arc::clone(&self.shared),
            }))
            .add_service(LogsServiceServer::new(GrpcLogsService {
                shared: Arc::clone(&self.shared),
            }))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                self.shared.lifecycle.shutdown_signal(),
            )
            .await;

        self.shared.lifecycle.exit_serve();
        tracing::info!("OTLP/gRPC receiver stopped");
        result.map_err(CodelensError::from)
    }

    fn stop(&self) {
        self.shared.lifecycle.initiate();
    }

    async fn stop_wait(&self) {
        self.shared.lifecycle.stop_wait().await;
    }

    fn set_log_callback(&self, cb: LogCallback) {
        self.shared.log_callback.store(Some(Arc::new(cb)));
    }

    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }
}

struct GrpcTraceService {
    shared: Arc<Shared>,
}

#[tonic::async_trait]
impl TraceService for GrpcTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let headers = metadata_to_headers(request.metadata());
        let export_request = request.into_inner();
        tracing::debug!(
            "Received OTLP/gRPC trace export with {} resource spans",
            export_request.resource_spans.len()
        );

        let cb = Arc::clone(&self.shared.trace_callback);
        let stop = tokio::task::spawn_blocking(move || {
            let meta = server_meta(Protocol::Grpc);
            dispatch_traces(&cb, &export_request, &headers, &meta)
        })
        .await
        .map_err(|e| Status::internal(format!("trace callback failed: {e}")))?;

        if stop {
            self.shared.request_stop();
        }

        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

struct GrpcLogsService {
    shared: Arc<Shared>,
}

#[tonic::async_trait]
impl LogsService for GrpcLogsService {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> std::result::Result<Response<ExportLogsServiceResponse>, Status> {
        let Some(cb) = self.shared.log_callback.load_full() else {
            return Ok(Response::new(ExportLogsServiceResponse {
                partial_success: None,
            }));
        };

        let headers = metadata_to_headers(request.metadata());
        let export_request = request.into_inner();

        let stop = tokio::task::spawn_blocking(move || {
            let meta = server_meta(Protocol::Grpc);
            dispatch_logs(&cb, &export_request, &headers, &meta)
        })
        .await
        .map_err(|e| Status::internal(format!("log callback failed: {e}")))?;

        if stop {
            self.shared.request_stop();
        }

        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

/// Flattens call metadata: one entry per key, multiple values joined as CSV.
pub fn metadata_to_headers(metadata: &MetadataMap) -> Headers {
    let mut headers = Headers::new();
    for key in metadata.keys() {
        let (name, values): (&str, Vec<String>) = match key {
            KeyRef::Ascii(key) => (
                key.as_str(),
                metadata
                    .get_all(key.as_str())
                    .iter()
                    .map(|v| v.to_str().map(str::to_string).unwrap_or_default())
                    .collect(),
            ),
            KeyRef::Binary(key) => (
                key.as_str(),
                metadata
                    .get_all_bin(key.as_str())
                    .iter()
                    .map(|v| v.to_bytes().map(|b| hex::encode(&b)).unwrap_or_default())
                    .collect(),
            ),
        };
        headers.insert(name.to_string(), csv_join(&values));
    }
    headers
}

/// Joins fields as a single CSV record without a line terminator.
pub fn csv_join(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field_needs_quotes(field) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn field_needs_quotes(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    field == r"\."
        || field.contains([',', '"', '\r', '\n'])
        || field.starts_with([' ', '\t'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::ServerMeta;
    use opentelemetry_proto::tonic::trace::v1::{span::Event, ResourceSpans, Span};
    use tonic::metadata::MetadataValue;

    fn ignore_spans() -> TraceCallback {
        Arc::new(|_: &Span, _: &[Event], _: &ResourceSpans, _: &Headers, _: &ServerMeta| false)
    }

    #[test]
    fn test_csv_join() {
        assert_eq!(csv_join(&["a".into()]), "a");
        assert_eq!(csv_join(&["a".into(), "b".into()]), "a,b");
        assert_eq!(csv_join(&["x,y".into(), "say \"hi\"".into()]), "\"x,y\",\"say \"\"hi\"\"\"");
        assert_eq!(csv_join(&[" padded".into()]), "\" padded\"");
        assert_eq!(csv_join(&[]), "");
    }

    #[test]
    fn test_metadata_flattening() {
        let mut metadata = MetadataMap::new();
        metadata.insert("x-tenant", MetadataValue::from_static("acme"));
        metadata.append("x-tag", MetadataValue::from_static("one"));
        metadata.append("x-tag", MetadataValue::from_static("two"));

        let headers = metadata_to_headers(&metadata);
        assert_eq!(headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(headers.get("x-tag").map(String::as_str), Some("one,two"));
    }

    #[tokio::test]
    async fn test_stop_before_serve_returns_immediately() {
        let server = GrpcServer::new(ignore_spans(), Box::new(|| Ok(())));
        server.stop_wait().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        assert!(server.serve(listener).await.is_ok());
    }
}
