//! Query HTTP API and live update channel.
//!
//! Read-only views over the [`TraceStore`] for the UI and external tools,
//! a search endpoint, and a WebSocket that announces every stored span.

pub mod live;

use crate::core::config::ApiConfig;
use crate::core::{CodeSpanContext, CodelensError, Operation, Result, SpanId, TraceId, TraceStatus};
use crate::storage::{SearchRequest, SpanData, StorageStats, TraceData, TraceStore};
use axum::{
    extract::{rejection::JsonRejection, ws::WebSocketUpgrade, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::{Future, IntoFuture};
use std::path::Path as FsPath;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use live::{LiveEvent, LiveHub};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<TraceStore>,
    hub: Arc<LiveHub>,
    allowed_origins: Arc<Vec<String>>,
}

impl ApiState {
    /// Bundles the store, the live hub and the origin allow-list.
    pub fn new(store: Arc<TraceStore>, hub: Arc<LiveHub>, allowed_origins: Vec<String>) -> Self {
        Self {
            store,
            hub,
            allowed_origins: Arc::new(allowed_origins),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(flatten)]
    storage: StorageStats,
    live_subscribers: usize,
}

/// Error response.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

/// Handler failure rendered as an [`ErrorResponse`].
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<CodelensError> for ApiError {
    fn from(err: CodelensError) -> Self {
        let status = match err {
            CodelensError::InvalidId(_) | CodelensError::Decode(_) => StatusCode::BAD_REQUEST,
            CodelensError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            code: self.status.as_u16(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Full trace with every span keyed by id.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    trace_id: TraceId,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: TraceStatus,
    files: BTreeMap<String, bool>,
    spans: BTreeMap<SpanId, SpanResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpanResponse {
    name: String,
    service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<SpanId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<SpanId>,
    start_time: DateTime<Utc>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    file_contexts: Vec<FileContextResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileContextResponse {
    file_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    function_name: String,
    operation: Operation,
    line_start: usize,
    line_end: usize,
    #[serde(skip_serializing_if = "String::is_empty")]
    code_snippet: String,
}

impl From<&TraceData> for TraceResponse {
    fn from(trace: &TraceData) -> Self {
        Self {
            trace_id: trace.trace_id.clone(),
            start_time: trace.start_time.into(),
            end_time: trace.end_time.into(),
            status: trace.status,
            files: trace.files.iter().map(|f| (f.clone(), true)).collect(),
            spans: trace
                .spans
                .iter()
                .map(|(id, span)| (id.clone(), SpanResponse::from(span)))
                .collect(),
        }
    }
}

impl From<&SpanData> for SpanResponse {
    fn from(span: &SpanData) -> Self {
        Self {
            name: span.record.name.clone(),
            service: span.record.resource.service_name.clone(),
            parent_id: span.record.parent_span_id.clone(),
            children: span.children.clone(),
            start_time: span.record.start_time.into(),
            duration_ms: u64::try_from(span.duration().as_millis()).unwrap_or(u64::MAX),
            file_contexts: span.contexts.iter().map(FileContextResponse::from).collect(),
        }
    }
}

impl From<&CodeSpanContext> for FileContextResponse {
    fn from(ctx: &CodeSpanContext) -> Self {
        Self {
            file_path: ctx.file_path.clone(),
            function_name: ctx.function_name.clone(),
            operation: ctx.operation.clone(),
            line_start: ctx.line_start,
            line_end: ctx.line_end,
            code_snippet: ctx.code_snapshot.clone(),
        }
    }
}

/// Builds the API router. `ui_dir` is served for every unmatched path.
pub fn create_router(state: ApiState, ui_dir: Option<&FsPath>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/traces", get(list_traces_handler))
        .route("/api/trace/:id", get(get_trace_handler))
        .route("/api/files", get(list_files_handler))
        .route("/api/file/*path", get(get_file_handler))
        .route("/api/spans/search", post(search_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    if let Some(dir) = ui_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    )
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid allowed origin {:?}", o);
                None
            },
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Binds `0.0.0.0:<port>` and serves the API until `shutdown` resolves.
pub async fn start_server<F>(state: ApiState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CodelensError::network(format!("Failed to bind API server to {}: {}", addr, e)))?;

    let router = create_router(state, config.ui_dir.as_deref());
    serve(listener, router, shutdown).await
}

/// Serves `router` on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Query API listening on http://{}", addr);
    }

    let server = axum::serve(listener, router).into_future();
    tokio::select! {
        result = server => result?,
        _ = shutdown => {},
    }

    tracing::info!("Query API stopped");
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.store.stats(),
        live_subscribers: state.hub.subscriber_count(),
    })
}

/// GET /api/traces
async fn list_traces_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.list_traces())
}

/// GET /api/trace/:id
async fn get_trace_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<TraceResponse>, ApiError> {
    let trace_id = TraceId::new(id)?;
    let trace = state
        .store
        .get_trace(&trace_id)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Trace not found"))?;
    Ok(Json(TraceResponse::from(&trace)))
}

/// GET /api/files
async fn list_files_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.list_files())
}

/// GET /api/file/*path
///
/// The router drops the leading slash of absolute paths unless the client
/// doubled it, so both spellings are tried.
async fn get_file_handler(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> std::result::Result<Json<BTreeMap<TraceId, Vec<CodeSpanContext>>>, ApiError> {
    let mut traces = state.store.get_file_traces(&path);
    if traces.is_empty() && !path.starts_with('/') {
        traces = state.store.get_file_traces(&format!("/{path}"));
    }

    if traces.is_empty() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "File not found in any traces"));
    }
    Ok(Json(traces))
}

/// POST /api/spans/search
async fn search_handler(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<SearchRequest>, JsonRejection>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!("Rejected search body: {}", e);
        ApiError::new(StatusCode::BAD_REQUEST, "Invalid request body")
    })?;

    Ok(Json(state.store.search_traces(&request)))
}

/// GET /ws
async fn ws_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !live::origin_allowed(&state.allowed_origins, origin) {
        tracing::debug!("Rejected live connection from origin {:?}", origin);
        return ApiError::new(StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| live::serve_socket(socket, hub))
}
