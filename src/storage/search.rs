//! Trace search with per-file insights and a plain-language summary.

use super::{FileInsight, TraceData, TraceDigest, TraceStore};
use crate::core::{CodelensError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, SystemTime};

/// Search criteria. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchRequest {
    /// Free text; only drives summary generation
    pub query: String,
    /// Keep traces touching at least one of these files
    pub files: Vec<String>,
    /// Maximum age such as `1h` or `30m`
    pub time_range: Option<String>,
    /// Keep only traces with error status
    pub errors_only: bool,
    /// Maximum number of traces, 0 for no cap
    pub limit: usize,
}

impl SearchRequest {
    /// Parsed `time_range`; empty or absent means no age limit.
    pub fn max_age(&self) -> Result<Option<Duration>> {
        match self.time_range.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(range) => humantime::parse_duration(range)
                .map(Some)
                .map_err(|e| CodelensError::decode(format!("invalid timeRange {range:?}: {e}"))),
        }
    }
}

/// Matched traces, per-file insights and an optional summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Matching traces, most recently ended first
    pub traces: Vec<TraceDigest>,
    /// Insight per file touched by a matching trace
    pub file_insights: BTreeMap<String, FileInsight>,
    /// Human-readable description, empty without a query
    pub summary: String,
}

impl TraceStore {
    /// Filters traces by age, then error status, then file membership, and
    /// stops once `limit` traces matched. The summary is only generated for
    /// a non-empty query.
    ///
    /// An unparseable `time_range` applies no age cutoff.
    pub fn search_traces(&self, request: &SearchRequest) -> SearchResponse {
        let max_age = request.max_age().unwrap_or_else(|e| {
            tracing::warn!("Ignoring search time range: {}", e);
            None
        });
        let cutoff = max_age.and_then(|age| SystemTime::now().checked_sub(age));
        let wanted_files: HashSet<&str> = request.files.iter().map(String::as_str).collect();

        let inner = self.inner.read();
        let mut candidates: Vec<&TraceData> = inner.traces.values().collect();
        candidates.sort_by(|a, b| b.end_time.cmp(&a.end_time).then_with(|| a.trace_id.cmp(&b.trace_id)));

        let mut response = SearchResponse::default();
        for trace in candidates {
            if cutoff.is_some_and(|cutoff| trace.end_time < cutoff) {
                continue;
            }
            if request.errors_only && !trace.is_error() {
                continue;
            }
            if !wanted_files.is_empty() && !trace.files.iter().any(|f| wanted_files.contains(f.as_str())) {
                continue;
            }

            collect_insights(trace, &mut response.file_insights);
            response.traces.push(trace.digest());

            if request.limit > 0 && response.traces.len() >= request.limit {
                break;
            }
        }
        drop(inner);

        if !request.query.is_empty() {
            response.summary = generate_summary(request, &response);
        }
        response
    }
}

fn collect_insights(trace: &TraceData, insights: &mut BTreeMap<String, FileInsight>) {
    for file in &trace.files {
        let insight = insights
            .entry(file.clone())
            .or_insert_with(|| FileInsight {
                file_path: file.clone(),
                ..Default::default()
            });

        for span in trace.spans.values() {
            for context in span.contexts.iter().filter(|c| c.file_path == *file) {
                if context.is_error() {
                    insight.error_lines.push(context.line_start);
                }
                insight.hotspot_lines.push(context.line_start);
                insight
                    .related
                    .extend(trace.files.iter().filter(|other| *other != file).cloned());
            }
        }
    }
}

fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Describes a search result in a few short sentences.
pub fn generate_summary(request: &SearchRequest, response: &SearchResponse) -> String {
    if response.traces.is_empty() {
        return "No traces found matching your query.".to_string();
    }

    let mut summary = format!("Found {}", pluralize(response.traces.len(), "trace", "traces"));
    if request.errors_only {
        summary.push_str(" with errors");
    }

    match request.files.as_slice() {
        [] => {},
        [file] => summary.push_str(&format!(" involving the file {file}")),
        files => summary.push_str(&format!(" involving {}", pluralize(files.len(), "file", "files"))),
    }

    if let Some(range) = request.time_range.as_deref().filter(|r| !r.trim().is_empty()) {
        summary.push_str(&format!(" in the last {range}"));
    }
    summary.push('.');

    let total_errors: usize = response.traces.iter().map(|t| t.error_count).sum();
    if total_errors > 0 {
        summary.push_str(&format!(
            " Total of {} detected.",
            pluralize(total_errors, "error", "errors")
        ));
    }

    if !response.file_insights.is_empty() {
        summary.push_str(&format!(
            " The analysis covers {}.",
            pluralize(response.file_insights.len(), "file", "files")
        ));
    }

    summary
}
