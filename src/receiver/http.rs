//! OTLP/HTTP server.
//!
//! `/v1/logs` receives log exports; every other path is treated as a trace
//! export. Bodies are `application/x-protobuf` or `application/json`; any
//! other content type is answered with 406.

use super::{
    dispatch_logs, dispatch_traces, json, server_meta, Headers, Lifecycle, LogCallback,
    OtlpServer, Protocol, ServerMeta, StopHook, TraceCallback,
};
use crate::core::Result;
use arc_swap::ArcSwapOption;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri, Version},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// OTLP/HTTP server
pub struct HttpServer {
    shared: Arc<Shared>,
}

struct Shared {
    trace_callback: TraceCallback,
    log_callback: ArcSwapOption<LogCallback>,
    lifecycle: Arc<Lifecycle>,
}

impl Shared {
    fn request_stop(&self) {
        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move { lifecycle.stop_wait().await });
    }
}

/// Body encodings accepted on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    /// `application/x-protobuf`
    Protobuf,
    /// `application/json`
    Json,
}

impl BodyEncoding {
    /// Matches the media type, ignoring parameters such as `charset`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case("application/x-protobuf") {
            Some(BodyEncoding::Protobuf)
        } else if media_type.eq_ignore_ascii_case("application/json") {
            Some(BodyEncoding::Json)
        } else {
            None
        }
    }
}

impl HttpServer {
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

    fn router(&self) -> Router {
        Router::new()
            .route("/v1/logs", any(handle_logs))
            .fallback(handle_traces)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.shared))
    }
}

#[async_trait::async_trait]
impl OtlpServer for HttpServer {
    async fn listen_and_serve(&self, endpoint: &str) {
        let listener = match TcpListener::bind(endpoint).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to bind OTLP/HTTP listener on {}: {}", endpoint, e);
                std::process::exit(1);
            },
        };
        if let Err(e) = self.serve(listener).await {
            tracing::error!("OTLP/HTTP server failed: {}", e);
            std::process::exit(1);
        }
    }

    async fn serve(&self, listener: TcpListener) -> Result<()> {
        if !self.shared.lifecycle.enter_serve() {
            return Ok(());
        }

        match listener.local_addr() {
            Ok(addr) => tracing::info!("OTLP/HTTP receiver listening on {}", addr),
            Err(e) => tracing::warn!("OTLP/HTTP receiver started, local address unknown: {}", e),
        }

        // Idle keep-alive connections are closed on shutdown; in-flight
        // requests finish before serve returns.
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shared.lifecycle.shutdown_signal())
            .await;

        self.shared.lifecycle.exit_serve();
        tracing::info!("OTLP/HTTP receiver stopped");
        Ok(result?)
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
        Protocol::Http
    }
}

async fn handle_traces(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(encoding) = negotiate(&headers) else {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    };
    tracing::debug!("Received OTLP/HTTP trace export, {} bytes, {:?}", body.len(), encoding);

    let request = decode_traces(encoding, &body);
    let meta = request_meta(&method, &uri, version, &headers);
    let headers = flatten_headers(&headers);

    let cb = Arc::clone(&shared.trace_callback);
    let stop = tokio::task::spawn_blocking(move || dispatch_traces(&cb, &request, &headers, &meta)).await;

    match stop {
        Ok(true) => shared.request_stop(),
        Ok(false) => {},
        Err(e) => {
            tracing::error!("Trace callback failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    }
    StatusCode::OK.into_response()
}

async fn handle_logs(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(cb) = shared.log_callback.load_full() else {
        return StatusCode::OK.into_response();
    };
    let Some(encoding) = negotiate(&headers) else {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    };

    let request = decode_logs(encoding, &body);
    let meta = request_meta(&method, &uri, version, &headers);
    let headers = flatten_headers(&headers);

    let stop = tokio::task::spawn_blocking(move || dispatch_logs(&cb, &request, &headers, &meta)).await;

    match stop {
        Ok(true) => shared.request_stop(),
        Ok(false) => {},
        Err(e) => {
            tracing::error!("Log callback failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        },
    }
    StatusCode::OK.into_response()
}

fn negotiate(headers: &HeaderMap) -> Option<BodyEncoding> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(BodyEncoding::from_content_type)
}

/// A body that fails to decode is delivered as an empty request.
fn decode_traces(encoding: BodyEncoding, body: &[u8]) -> ExportTraceServiceRequest {
    let decoded = match encoding {
        BodyEncoding::Protobuf => ExportTraceServiceRequest::decode(body).map_err(|e| e.to_string()),
        BodyEncoding::Json => json::decode_trace_request(body).map_err(|e| e.to_string()),
    };
    decoded.unwrap_or_else(|e| {
        tracing::warn!("Failed to decode OTLP/HTTP trace body ({:?}): {}", encoding, e);
        ExportTraceServiceRequest::default()
    })
}

fn decode_logs(encoding: BodyEncoding, body: &[u8]) -> ExportLogsServiceRequest {
    let decoded = match encoding {
        BodyEncoding::Protobuf => ExportLogsServiceRequest::decode(body).map_err(|e| e.to_string()),
        BodyEncoding::Json => json::decode_logs_request(body).map_err(|e| e.to_string()),
    };
    decoded.unwrap_or_else(|e| {
        tracing::warn!("Failed to decode OTLP/HTTP log body ({:?}): {}", encoding, e);
        ExportLogsServiceRequest::default()
    })
}

fn request_meta(method: &Method, uri: &Uri, version: Version, headers: &HeaderMap) -> ServerMeta {
    let mut meta = server_meta(Protocol::Http);
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    meta.insert("method".to_string(), method.to_string());
    meta.insert("http-version".to_string(), format!("{version:?}"));
    meta.insert("content-type".to_string(), header_str(header::CONTENT_TYPE));
    meta.insert("host".to_string(), header_str(header::HOST));
    meta.insert("uri".to_string(), uri.to_string());
    meta
}

/// First value per header name; names are lowercase.
fn flatten_headers(headers: &HeaderMap) -> Headers {
    let mut flat = Headers::new();
    for (name, value) in headers {
        flat.entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_negotiation() {
        assert_eq!(
            BodyEncoding::from_content_type("application/x-protobuf"),
            Some(BodyEncoding::Protobuf)
        );
        assert_eq!(
            BodyEncoding::from_content_type("application/json; charset=utf-8"),
            Some(BodyEncoding::Json)
        );
        assert_eq!(BodyEncoding::from_content_type("text/plain"), None);
        assert_eq!(BodyEncoding::from_content_type(""), None);
    }

    #[test]
    fn test_malformed_body_decodes_empty() {
        let request = decode_traces(BodyEncoding::Protobuf, b"\xff\xff\xff");
        assert!(request.resource_spans.is_empty());
        let request = decode_traces(BodyEncoding::Json, b"{broken");
        assert!(request.resource_spans.is_empty());
    }

    #[test]
    fn test_request_meta() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::HOST, "collector:4318".parse().unwrap());
        let uri: Uri = "/v1/traces".parse().unwrap();

        let meta = request_meta(&Method::POST, &uri, Version::HTTP_11, &headers);
        assert_eq!(meta["proto"], "http");
        assert_eq!(meta["method"], "POST");
        assert_eq!(meta["http-version"], "HTTP/1.1");
        assert_eq!(meta["host"], "collector:4318");
        assert_eq!(meta["uri"], "/v1/traces");

        let flat = flatten_headers(&headers);
        assert_eq!(flat["content-type"], "application/json");
    }
}
