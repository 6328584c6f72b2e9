//! Wires the OTLP receiver, the analyzer, the trace store and the query API.

use crate::analyzer::CodeAnalyzer;
use crate::api::{self, ApiState, LiveEvent, LiveHub};
use crate::core::{Config, Result, SpanRecord};
use crate::receiver::convert::{any_value_to_string, extract_service_name, span_record_from_otlp};
use crate::receiver::{
    new_server, Headers, LogCallback, OtlpServer, Protocol, ServerEndpoint, ServerMeta, StopHook,
    TraceCallback,
};
use crate::storage::TraceStore;
use opentelemetry_proto::tonic::logs::v1::{LogRecord, ResourceLogs};
use opentelemetry_proto::tonic::trace::v1::{span::Event, ResourceSpans, Span};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Upper bound between two retention sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Turns received spans into stored, code-annotated spans and announces them.
pub struct SpanPipeline {
    store: Arc<TraceStore>,
    analyzer: CodeAnalyzer,
    hub: Arc<LiveHub>,
}

impl SpanPipeline {
    /// Creates a pipeline writing into `store` and notifying `hub`.
    pub fn new(store: Arc<TraceStore>, analyzer: CodeAnalyzer, hub: Arc<LiveHub>) -> Self {
        Self { store, analyzer, hub }
    }

    /// Analyzes, stores and announces one span.
    ///
    /// File reads happen before the store lock is taken.
    pub fn handle_span(&self, record: SpanRecord) {
        let contexts = self.analyzer.analyze_span(&record);
        let event = LiveEvent::new_span(record.trace_id.clone(), record.span_id.clone());

        tracing::debug!(
            "Storing span {} of trace {} with {} code contexts",
            record.span_id,
            record.trace_id,
            contexts.len()
        );
        self.store.add_span(record, contexts);
        self.hub.notify(&event);
    }

    /// Receiver callback feeding this pipeline. Never asks the server to stop.
    pub fn trace_callback(self: &Arc<Self>) -> TraceCallback {
        let pipeline = Arc::clone(self);
        Arc::new(
            move |span: &Span, events: &[Event], resource_spans: &ResourceSpans, _: &Headers, _: &ServerMeta| {
                let record = span_record_from_otlp(span, events, resource_spans.resource.as_ref());
                pipeline.handle_span(record);
                false
            },
        )
    }

    /// The store spans end up in
    pub fn store(&self) -> &Arc<TraceStore> {
        &self.store
    }
}

/// Log callback that writes every received record to the process log.
pub fn log_echo_callback() -> LogCallback {
    Arc::new(|record: &LogRecord, resource_logs: &ResourceLogs, _: &Headers, _: &ServerMeta| {
        let service = resource_logs
            .resource
            .as_ref()
            .map(|r| extract_service_name(&r.attributes))
            .unwrap_or_else(|| "unknown".to_string());
        let body = record
            .body
            .as_ref()
            .and_then(|b| b.value.as_ref())
            .map(any_value_to_string)
            .unwrap_or_default();
        let severity = if record.severity_text.is_empty() {
            record.severity_number.to_string()
        } else {
            record.severity_text.clone()
        };

        tracing::info!(
            target: "codelens::otlp_logs",
            service = %service,
            severity = %severity,
            trace_id = %hex::encode(&record.trace_id),
            span_id = %hex::encode(&record.span_id),
            "{}",
            body
        );
        false
    })
}

/// Main application struct that coordinates all components of codelens.
pub struct Application {
    config: Config,
    pipeline: Arc<SpanPipeline>,
    hub: Arc<LiveHub>,
}

impl Application {
    /// Create a new Application with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(TraceStore::from_config(&config.storage));
        let hub = Arc::new(LiveHub::new());
        let analyzer = CodeAnalyzer::new(config.analyzer.project_root.clone());
        let pipeline = Arc::new(SpanPipeline::new(store, analyzer, Arc::clone(&hub)));

        Ok(Self { config, pipeline, hub })
    }

    /// Trace store shared with the API
    pub fn store(&self) -> &Arc<TraceStore> {
        self.pipeline.store()
    }

    /// Live subscriber hub
    pub fn hub(&self) -> &Arc<LiveHub> {
        &self.hub
    }

    /// Builds the OTLP server for `protocol`, wired to the pipeline.
    pub fn build_server(&self, protocol: Protocol) -> Arc<dyn OtlpServer> {
        let store = Arc::clone(self.store());
        let hook: StopHook = Box::new(move || {
            let stats = store.stats();
            tracing::info!(
                "Shutting down with {} traces, {} spans across {} files",
                stats.trace_count,
                stats.span_count,
                stats.file_count
            );
            Ok(())
        });

        let server = new_server(protocol, self.pipeline.trace_callback(), hook);
        if self.config.logging.echo_logs {
            server.set_log_callback(log_echo_callback());
        }
        server
    }

    /// Runs the receiver and the query API until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let endpoint = ServerEndpoint::resolve(&self.config.server.protocol, &self.config.server.endpoint)?;
        tracing::info!(
            "Starting codelens: OTLP/{} on {}, query API on port {}",
            endpoint.protocol,
            endpoint.address,
            self.config.api.port
        );
        if let Some(root) = &self.config.analyzer.project_root {
            tracing::info!("Project root: {}", root.display());
        }

        let server = self.build_server(endpoint.protocol);
        let otlp = Arc::clone(&server);
        let otlp_handle = tokio::spawn(async move { otlp.listen_and_serve(&endpoint.address).await });

        let state = ApiState::new(
            Arc::clone(self.store()),
            Arc::clone(&self.hub),
            self.config.api.allowed_origins.clone(),
        );
        let api_config = self.config.api.clone();
        let (api_stop_tx, api_stop_rx) = oneshot::channel::<()>();
        let mut api_handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = api_stop_rx.await;
            };
            api::start_server(state, &api_config, shutdown).await
        });

        let cleanup_handle = self.spawn_cleanup();

        let api_result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                tracing::info!("Received shutdown signal, stopping...");
                None
            },
            result = &mut api_handle => Some(result),
        };

        server.stop_wait().await;
        let _ = api_stop_tx.send(());
        if let Some(handle) = cleanup_handle {
            handle.abort();
        }
        otlp_handle.await?;

        match api_result {
            Some(result) => result??,
            None => api_handle.await??,
        }
        Ok(())
    }

    /// Evicts expired traces even when no spans arrive.
    fn spawn_cleanup(&self) -> Option<tokio::task::JoinHandle<()>> {
        let retention = self.config.storage.retention;
        if retention.is_zero() {
            return None;
        }

        let store = Arc::clone(self.store());
        let period = retention.min(CLEANUP_INTERVAL);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = store.cleanup_old_traces();
                if removed > 0 {
                    tracing::debug!("Retention sweep removed {} traces", removed);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SpanId, TraceId};

    #[test]
    fn test_pipeline_stores_and_notifies() {
        let store = Arc::new(TraceStore::new(0, Duration::ZERO));
        let hub = Arc::new(LiveHub::new());
        let (_, mut events) = hub.subscribe();
        let pipeline = Arc::new(SpanPipeline::new(
            Arc::clone(&store),
            CodeAnalyzer::new(None),
            Arc::clone(&hub),
        ));

        let span = Span {
            trace_id: vec![3; 16],
            span_id: vec![4; 8],
            name: "GET /".to_string(),
            ..Default::default()
        };
        let cb = pipeline.trace_callback();
        let stop = cb(&span, &[], &ResourceSpans::default(), &Default::default(), &Default::default());

        assert!(!stop);
        assert_eq!(store.span_count(), 1);
        let event = events.try_recv().unwrap();
        assert_eq!(event.trace_id, Some(TraceId::from_bytes(&[3; 16])));
        assert_eq!(event.span_id, Some(SpanId::from_bytes(&[4; 8])));
    }

    #[test]
    fn test_application_rejects_invalid_config() {
        let mut config = Config::default();
        config.server.endpoint = "https://localhost:4318".to_string();
        assert!(Application::new(config).is_err());
    }
}
