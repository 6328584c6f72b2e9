//! Storage data types and structures.

use crate::core::{CodeSpanContext, SpanId, SpanRecord, TraceId, TraceStatus};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};

/// A stored span with its derived tree links and code contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    /// The span as received
    pub record: SpanRecord,
    /// Ids of spans whose parent is this span, in arrival order
    pub children: Vec<SpanId>,
    /// Code contexts the analyzer found for this span
    pub contexts: Vec<CodeSpanContext>,
}

impl SpanData {
    /// Wraps a record with no children yet
    pub fn new(record: SpanRecord, contexts: Vec<CodeSpanContext>) -> Self {
        Self {
            record,
            children: Vec::new(),
            contexts,
        }
    }

    /// Span duration
    pub fn duration(&self) -> Duration {
        self.record.duration()
    }

    /// Number of error or exception contexts
    pub fn error_count(&self) -> usize {
        self.contexts.iter().filter(|c| c.is_error()).count()
    }
}

/// All spans of one trace plus its aggregates.
#[derive(Debug, Clone)]
pub struct TraceData {
    /// Trace identity
    pub trace_id: TraceId,
    /// Spans keyed by span id
    pub spans: AHashMap<SpanId, SpanData>,
    /// Most recently stored parentless span
    pub root_span: Option<SpanId>,
    /// Earliest span start
    pub start_time: SystemTime,
    /// Latest span end
    pub end_time: SystemTime,
    /// `error` once any contained context is an error or exception
    pub status: TraceStatus,
    /// Files referenced by any contained context
    pub files: BTreeSet<String>,
    /// Children seen before their parent, keyed by the missing parent id
    pub(crate) pending_children: AHashMap<SpanId, Vec<SpanId>>,
}

impl TraceData {
    pub(crate) fn new(trace_id: TraceId, start_time: SystemTime, end_time: SystemTime) -> Self {
        Self {
            trace_id,
            spans: AHashMap::new(),
            root_span: None,
            start_time,
            end_time,
            status: TraceStatus::Ok,
            files: BTreeSet::new(),
            pending_children: AHashMap::new(),
        }
    }

    /// Root span, when one has been stored
    pub fn root(&self) -> Option<&SpanData> {
        self.root_span.as_ref().and_then(|id| self.spans.get(id))
    }

    /// Number of stored spans
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Error and exception contexts across all spans
    pub fn error_count(&self) -> usize {
        self.spans.values().map(SpanData::error_count).sum()
    }

    /// End minus start, zero when inverted
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or(Duration::ZERO)
    }

    /// True when any context is an error
    pub fn is_error(&self) -> bool {
        self.status == TraceStatus::Error
    }

    /// Rebuilds `files` and `status` from the stored contexts.
    pub(crate) fn recompute_aggregates(&mut self) {
        self.files = self
            .spans
            .values()
            .flat_map(|s| s.contexts.iter().map(|c| c.file_path.clone()))
            .collect();
        self.status = if self.spans.values().any(|s| s.error_count() > 0) {
            TraceStatus::Error
        } else {
            TraceStatus::Ok
        };
    }

    /// Listing projection
    pub fn digest(&self) -> TraceDigest {
        TraceDigest {
            trace_id: self.trace_id.clone(),
            name: self
                .root()
                .map(|root| root.record.name.clone())
                .unwrap_or_default(),
            duration_ms: self.duration().as_millis() as f64,
            span_count: self.span_count(),
            error_count: self.error_count(),
            files: self.files.iter().cloned().collect(),
            start_time: DateTime::<Utc>::from(self.start_time),
        }
    }
}

/// Compact summary of a trace for listings and search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceDigest {
    /// Trace identity
    pub trace_id: TraceId,
    /// Root span name, empty without a root
    pub name: String,
    /// Trace duration in milliseconds
    pub duration_ms: f64,
    /// Number of spans
    pub span_count: usize,
    /// Error and exception contexts across all spans
    pub error_count: usize,
    /// Files touched by the trace
    pub files: Vec<String>,
    /// Earliest span start
    pub start_time: DateTime<Utc>,
}

/// Code-centric view of one file across the matched traces.
///
/// Lists keep every occurrence; repeated lines and files weigh more.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInsight {
    /// The file
    pub file_path: String,
    /// Start line of every context touching the file
    pub hotspot_lines: Vec<usize>,
    /// Start line of every error context touching the file
    pub error_lines: Vec<usize>,
    /// Other files touched by the same traces
    pub related: Vec<String>,
}

/// Store statistics for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Number of traces
    pub trace_count: usize,
    /// Number of spans across all traces
    pub span_count: usize,
    /// Number of files with at least one context
    pub file_count: usize,
    /// Configured span cap, 0 when unlimited
    pub max_spans: usize,
    /// Configured retention in seconds, 0 when unlimited
    pub retention_seconds: u64,
}
