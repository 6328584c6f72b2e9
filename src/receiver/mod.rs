//! OpenTelemetry receiver implementation.
//!
//! Two interchangeable OTLP servers sit behind the [`OtlpServer`] trait:
//! [`GrpcServer`] (tonic, OTLP/gRPC) and [`HttpServer`] (axum, OTLP/HTTP with
//! protobuf and JSON bodies). Both decode an export request, hand it to the
//! [`dispatch`] router which invokes the registered callback once per span or
//! log record, and share one [`Lifecycle`] that guarantees the shutdown
//! sequence runs exactly once.

pub mod convert;
pub mod dispatch;
pub mod grpc;
pub mod http;
pub mod json;
pub mod lifecycle;

use crate::core::config::DEFAULT_OTLP_ENDPOINT;
use crate::core::{CodelensError, Result};
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs};
use opentelemetry_proto::tonic::trace::v1::{span::Event, ResourceSpans, Span};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use dispatch::{dispatch_logs, dispatch_traces};
pub use grpc::GrpcServer;
pub use http::HttpServer;
pub use lifecycle::{Lifecycle, LifecycleState};

/// Request headers (HTTP) or call metadata (gRPC), flattened to strings.
pub type Headers = HashMap<String, String>;

/// Metadata assigned by the server; always carries `proto` = `grpc` | `http`.
pub type ServerMeta = HashMap<String, String>;

/// Called once per received span. Returning `true` asks the server to stop.
pub type TraceCallback =
    Arc<dyn Fn(&Span, &[Event], &ResourceSpans, &Headers, &ServerMeta) -> bool + Send + Sync>;

/// Called once per received log record. Returning `true` asks the server to stop.
pub type LogCallback =
    Arc<dyn Fn(&LogRecord, &ResourceLogs, &Headers, &ServerMeta) -> bool + Send + Sync>;

/// Runs once, right before the transport is told to terminate.
pub type StopHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Lifecycle contract shared by both OTLP transports.
#[async_trait::async_trait]
pub trait OtlpServer: Send + Sync {
    /// Binds `endpoint` (`host:port`) and serves until stopped.
    /// A bind or serve failure is fatal and exits the process.
    async fn listen_and_serve(&self, endpoint: &str);

    /// Serves on an already bound listener; returns once stopped.
    async fn serve(&self, listener: TcpListener) -> Result<()>;

    /// Starts the shutdown sequence without waiting for it to finish.
    fn stop(&self);

    /// Starts the shutdown sequence and waits until the serve loop returned.
    async fn stop_wait(&self);

    /// Registers the per-log-record callback. Without one, log exports are
    /// acknowledged and dropped.
    fn set_log_callback(&self, cb: LogCallback);

    /// Which transport this is
    fn protocol(&self) -> Protocol;
}

/// OTLP transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// OTLP/gRPC
    Grpc,
    /// OTLP/HTTP (protobuf or JSON bodies)
    Http,
}

impl Protocol {
    /// Name used in server metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = CodelensError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grpc" => Ok(Protocol::Grpc),
            "http" => Ok(Protocol::Http),
            other => Err(CodelensError::config(format!("unknown OTLP protocol {other:?}"))),
        }
    }
}

/// Where and how the OTLP server listens, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    /// Transport to start
    pub protocol: Protocol,
    /// `host:port` to bind
    pub address: String,
}

impl ServerEndpoint {
    /// Resolves the transport from an explicit protocol and the endpoint URL.
    ///
    /// HTTP is chosen when the protocol is not `grpc` and either starts with
    /// `http/` or the endpoint scheme is `http`. An `https` protocol or scheme
    /// is rejected. Everything else is gRPC. An empty endpoint falls back to
    /// [`DEFAULT_OTLP_ENDPOINT`].
    pub fn resolve(protocol: &str, endpoint: &str) -> Result<Self> {
        let endpoint = if endpoint.is_empty() { DEFAULT_OTLP_ENDPOINT } else { endpoint };

        let (scheme, rest) = match endpoint.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (String::new(), endpoint),
        };
        let address = rest.split('/').next().unwrap_or_default();
        if address.is_empty() {
            return Err(CodelensError::config(format!(
                "OTLP endpoint {endpoint:?} has no host:port"
            )));
        }

        let protocol = if protocol != "grpc" && (protocol.starts_with("http/") || scheme == "http")
        {
            Protocol::Http
        } else if protocol == "https" || scheme == "https" {
            return Err(CodelensError::config(
                "https server is not supported yet, use an http:// or grpc:// endpoint",
            ));
        } else {
            Protocol::Grpc
        };

        Ok(Self {
            protocol,
            address: address.to_string(),
        })
    }
}

/// Builds the server for `protocol`.
pub fn new_server(protocol: Protocol, cb: TraceCallback, stop: StopHook) -> Arc<dyn OtlpServer> {
    match protocol {
        Protocol::Grpc => Arc::new(GrpcServer::new(cb, stop)),
        Protocol::Http => Arc::new(HttpServer::new(cb, stop)),
    }
}

/// Server metadata with only the protocol name set.
pub(crate) fn server_meta(protocol: Protocol) -> ServerMeta {
    let mut meta = ServerMeta::new();
    meta.insert("proto".to_string(), protocol.as_str().to_string());
    meta
}
