//! In-memory correlation store.
//!
//! Groups spans into traces, keeps parent/child links regardless of arrival
//! order and maintains a reverse index from file path to the code contexts
//! that reference it. Both indexes live behind one lock so they always change
//! together. Eviction runs at the end of every write.

pub mod search;
pub mod types;

use crate::core::config::StorageConfig;
use crate::core::{CodeSpanContext, SpanId, SpanRecord, TraceId};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

pub use search::{generate_summary, SearchRequest, SearchResponse};
pub use types::{FileInsight, SpanData, StorageStats, TraceData, TraceDigest};

/// Traces by id plus the file reverse index.
#[derive(Default)]
struct StoreInner {
    traces: AHashMap<TraceId, TraceData>,
    spans_by_file: AHashMap<String, Vec<CodeSpanContext>>,
    span_count: usize,
}

/// Thread-safe trace correlation store.
pub struct TraceStore {
    inner: RwLock<StoreInner>,
    max_spans: usize,
    retention: Duration,
}

impl TraceStore {
    /// Creates a store. A zero `max_spans` or `retention` disables that limit.
    pub fn new(max_spans: usize, retention: Duration) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            max_spans,
            retention,
        }
    }

    /// Creates a store from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.max_spans, config.retention)
    }

    /// Upserts `record` with its analyzed `contexts`, then evicts.
    pub fn add_span(&self, record: SpanRecord, contexts: Vec<CodeSpanContext>) {
        self.add_span_at(record, contexts, SystemTime::now());
    }

    /// Like [`TraceStore::add_span`], evaluating retention against `now`.
    pub fn add_span_at(&self, record: SpanRecord, mut contexts: Vec<CodeSpanContext>, now: SystemTime) {
        let mut inner = self.inner.write();
        let StoreInner {
            traces,
            spans_by_file,
            span_count,
        } = &mut *inner;

        let trace_id = record.trace_id.clone();
        let span_id = record.span_id.clone();
        for context in &mut contexts {
            context.trace_id = trace_id.clone();
            context.span_id = span_id.clone();
        }

        let trace = traces
            .entry(trace_id.clone())
            .or_insert_with(|| TraceData::new(trace_id.clone(), record.start_time, record.end_time));
        if record.start_time < trace.start_time {
            trace.start_time = record.start_time;
        }
        if record.end_time > trace.end_time {
            trace.end_time = record.end_time;
        }

        let previous = trace.spans.remove(&span_id);
        let mut children = Vec::new();
        if let Some(previous) = &previous {
            children.clone_from(&previous.children);
            unindex_span(spans_by_file, &trace_id, &span_id, &previous.contexts);
            if previous.record.parent_span_id != record.parent_span_id {
                unlink_child(trace, previous.record.parent_span_id.as_ref(), &span_id);
            }
        } else {
            *span_count += 1;
        }

        // Children that arrived before this span
        if let Some(waiting) = trace.pending_children.remove(&span_id) {
            for child in waiting {
                if !children.contains(&child) {
                    children.push(child);
                }
            }
        }

        match &record.parent_span_id {
            None => trace.root_span = Some(span_id.clone()),
            Some(parent_id) if *parent_id == span_id => {},
            Some(parent_id) => match trace.spans.get_mut(parent_id) {
                Some(parent) => {
                    if !parent.children.contains(&span_id) {
                        parent.children.push(span_id.clone());
                    }
                },
                None => {
                    let waiting = trace.pending_children.entry(parent_id.clone()).or_default();
                    if !waiting.contains(&span_id) {
                        waiting.push(span_id.clone());
                    }
                },
            },
        }

        for context in &contexts {
            spans_by_file
                .entry(context.file_path.clone())
                .or_default()
                .push(context.clone());
        }

        let replaced = previous.is_some();
        let mut span = SpanData::new(record, contexts);
        span.children = children;
        if replaced {
            trace.spans.insert(span_id, span);
            trace.recompute_aggregates();
        } else {
            for context in &span.contexts {
                trace.files.insert(context.file_path.clone());
                if context.is_error() {
                    trace.status = crate::core::TraceStatus::Error;
                }
            }
            trace.spans.insert(span_id, span);
        }

        self.evict(&mut inner, now);
    }

    /// Runs the eviction sweep now; returns how many traces were removed.
    pub fn cleanup_old_traces(&self) -> usize {
        let mut inner = self.inner.write();
        self.evict(&mut inner, SystemTime::now())
    }

    fn evict(&self, inner: &mut StoreInner, now: SystemTime) -> usize {
        if self.max_spans == 0 && self.retention.is_zero() {
            return 0;
        }

        let mut doomed: Vec<TraceId> = Vec::new();
        if !self.retention.is_zero() {
            doomed.extend(
                inner
                    .traces
                    .values()
                    .filter(|trace| {
                        now.duration_since(trace.end_time)
                            .map(|age| age > self.retention)
                            .unwrap_or(false)
                    })
                    .map(|trace| trace.trace_id.clone()),
            );
        }

        if self.max_spans > 0 && inner.span_count > self.max_spans && doomed.is_empty() {
            let mut by_age: Vec<(SystemTime, &TraceId, usize)> = inner
                .traces
                .values()
                .map(|trace| (trace.end_time, &trace.trace_id, trace.span_count()))
                .collect();
            by_age.sort();

            let mut remaining = inner.span_count;
            for (_, trace_id, spans) in by_age {
                if remaining <= self.max_spans {
                    break;
                }
                remaining -= spans;
                doomed.push(trace_id.clone());
            }
        }

        for trace_id in &doomed {
            remove_trace(inner, trace_id);
        }
        if !doomed.is_empty() {
            tracing::debug!("Removed {} old traces from store", doomed.len());
        }
        doomed.len()
    }

    /// Full trace, if stored
    pub fn get_trace(&self, trace_id: &TraceId) -> Option<TraceData> {
        self.inner.read().traces.get(trace_id).cloned()
    }

    /// Single span, if stored
    pub fn get_span(&self, trace_id: &TraceId, span_id: &SpanId) -> Option<SpanData> {
        self.inner
            .read()
            .traces
            .get(trace_id)
            .and_then(|trace| trace.spans.get(span_id))
            .cloned()
    }

    /// Files with at least one context, sorted
    pub fn list_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.inner.read().spans_by_file.keys().cloned().collect();
        files.sort();
        files
    }

    /// Contexts referencing `file_path`, grouped by trace
    pub fn get_file_traces(&self, file_path: &str) -> BTreeMap<TraceId, Vec<CodeSpanContext>> {
        let inner = self.inner.read();
        let mut result: BTreeMap<TraceId, Vec<CodeSpanContext>> = BTreeMap::new();
        for context in inner.spans_by_file.get(file_path).into_iter().flatten() {
            result
                .entry(context.trace_id.clone())
                .or_default()
                .push(context.clone());
        }
        result
    }

    /// One digest per trace, most recently ended first
    pub fn list_traces(&self) -> Vec<TraceDigest> {
        let inner = self.inner.read();
        let mut traces: Vec<&TraceData> = inner.traces.values().collect();
        traces.sort_by(|a, b| b.end_time.cmp(&a.end_time).then_with(|| a.trace_id.cmp(&b.trace_id)));
        traces.into_iter().map(TraceData::digest).collect()
    }

    /// Counts for the health endpoint
    pub fn stats(&self) -> StorageStats {
        let inner = self.inner.read();
        StorageStats {
            trace_count: inner.traces.len(),
            span_count: inner.span_count,
            file_count: inner.spans_by_file.len(),
            max_spans: self.max_spans,
            retention_seconds: self.retention.as_secs(),
        }
    }

    /// Total spans across all traces
    pub fn span_count(&self) -> usize {
        self.inner.read().span_count
    }

    /// Number of traces
    pub fn trace_count(&self) -> usize {
        self.inner.read().traces.len()
    }
}

/// Drops the index entries a span contributed, pruning emptied buckets.
fn unindex_span(
    spans_by_file: &mut AHashMap<String, Vec<CodeSpanContext>>,
    trace_id: &TraceId,
    span_id: &SpanId,
    contexts: &[CodeSpanContext],
) {
    for context in contexts {
        if let Some(bucket) = spans_by_file.get_mut(&context.file_path) {
            bucket.retain(|c| !(c.trace_id == *trace_id && c.span_id == *span_id));
            if bucket.is_empty() {
                spans_by_file.remove(&context.file_path);
            }
        }
    }
}

fn unlink_child(trace: &mut TraceData, old_parent: Option<&SpanId>, child: &SpanId) {
    let Some(old_parent) = old_parent else {
        return;
    };
    if let Some(parent) = trace.spans.get_mut(old_parent) {
        parent.children.retain(|c| c != child);
    }
    if let Some(waiting) = trace.pending_children.get_mut(old_parent) {
        waiting.retain(|c| c != child);
        if waiting.is_empty() {
            trace.pending_children.remove(old_parent);
        }
    }
}

fn remove_trace(inner: &mut StoreInner, trace_id: &TraceId) {
    let Some(trace) = inner.traces.remove(trace_id) else {
        return;
    };
    inner.span_count -= trace.span_count();
    for file in &trace.files {
        if let Some(bucket) = inner.spans_by_file.get_mut(file) {
            bucket.retain(|c| c.trace_id != *trace_id);
            if bucket.is_empty() {
                inner.spans_by_file.remove(file);
            }
        }
    }
}
