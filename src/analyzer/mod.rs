//! Code context analyzer.
//!
//! Turns a span into the list of source locations it touched. File paths come
//! from span and event attributes whose key mentions `file` or `path`, and
//! from `path:line` occurrences in the stack traces of exception and error
//! events. Every context gets a bounded code window read from disk and, when
//! the window looks like code, the name of the enclosing function.

pub mod snippet;

use crate::core::{Attributes, CodeSpanContext, Operation, SpanEvent, SpanRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

pub use snippet::{enrich_with_file_contents, infer_function_name};

/// `path/to/file.ext:123`
static FILE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\w/.\-]+\.\w+):(\d+)").unwrap());

/// Lines captured after a stack-trace location.
const STACK_WINDOW: usize = 10;

/// Extracts code contexts from spans.
#[derive(Debug, Clone, Default)]
pub struct CodeAnalyzer {
    project_root: Option<PathBuf>,
}

impl CodeAnalyzer {
    /// Creates an analyzer. With no project root, any absolute path is accepted.
    pub fn new(project_root: Option<PathBuf>) -> Self {
        Self {
            project_root: project_root.filter(|root| !root.as_os_str().is_empty()),
        }
    }

    /// Configured project root
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// All contexts for `span`: span attributes first, then for each event
    /// its stack-trace locations followed by its attribute paths.
    ///
    /// Reads files from disk; call it outside any store lock.
    pub fn analyze_span(&self, span: &SpanRecord) -> Vec<CodeSpanContext> {
        let mut contexts = self.contexts_from_attributes(&span.attributes, || {
            infer_operation_from_span(span)
        });

        for event in &span.events {
            if is_exception_event(event) {
                contexts.extend(self.process_stack_trace(event));
            }
            contexts.extend(self.contexts_from_attributes(&event.attributes, || {
                infer_operation_from_event(event)
            }));
        }

        for context in &mut contexts {
            context.trace_id = span.trace_id.clone();
            context.span_id = span.span_id.clone();
        }
        contexts
    }

    fn contexts_from_attributes(
        &self,
        attributes: &Attributes,
        operation: impl Fn() -> Operation,
    ) -> Vec<CodeSpanContext> {
        attributes
            .iter()
            .filter(|(key, _)| is_file_key(key))
            .filter_map(|(_, value)| value.as_str())
            .filter(|path| !path.is_empty() && Path::new(path).is_absolute())
            .filter(|path| self.is_file_in_project(Path::new(path)))
            .map(|path| {
                let mut context = CodeSpanContext::new(path, operation());
                enrich_with_file_contents(&mut context);
                context
            })
            .collect()
    }

    fn process_stack_trace(&self, event: &SpanEvent) -> Vec<CodeSpanContext> {
        let Some(stack_trace) = event
            .attributes
            .iter()
            .find(|(key, _)| {
                let key = key.to_ascii_lowercase();
                key == "stack_trace" || key == "stacktrace"
            })
            .and_then(|(_, value)| value.as_str())
            .filter(|s| !s.is_empty())
        else {
            return Vec::new();
        };

        FILE_LINE
            .captures_iter(stack_trace)
            .filter_map(|caps| {
                let file = caps.get(1)?.as_str();
                let line: usize = caps.get(2)?.as_str().parse().ok()?;

                let path = self.resolve(file);
                if !self.is_file_in_project(&path) {
                    return None;
                }

                let mut context = CodeSpanContext::new(path.to_string_lossy(), Operation::Exception);
                context.line_start = line;
                context.line_end = line.saturating_add(STACK_WINDOW);
                enrich_with_file_contents(&mut context);
                Some(context)
            })
            .collect()
    }

    /// Relative stack-trace paths are taken relative to the project root.
    fn resolve(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.project_root {
            Some(root) if !path.is_absolute() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn is_file_in_project(&self, path: &Path) -> bool {
        match &self.project_root {
            Some(root) => path.starts_with(root),
            None => true,
        }
    }
}

fn is_file_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("file") || key.contains("path")
}

fn is_exception_event(event: &SpanEvent) -> bool {
    event.name == "exception" || event.name.to_lowercase().contains("error")
}

/// Operation implied by a span name, else by an `operation`/`action` attribute.
pub fn infer_operation_from_span(span: &SpanRecord) -> Operation {
    operation_from_name(&span.name, false)
        .or_else(|| operation_from_attributes(&span.attributes))
        .unwrap_or(Operation::Unknown)
}

/// Like [`infer_operation_from_span`], and error-like names map to `error`.
pub fn infer_operation_from_event(event: &SpanEvent) -> Operation {
    operation_from_name(&event.name, true)
        .or_else(|| operation_from_attributes(&event.attributes))
        .unwrap_or(Operation::Unknown)
}

fn operation_from_name(name: &str, detect_errors: bool) -> Option<Operation> {
    let name = name.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| name.contains(w));

    if has(&["read", "get"]) {
        Some(Operation::Read)
    } else if has(&["write", "put", "save", "update"]) {
        Some(Operation::Write)
    } else if has(&["exec", "run"]) {
        Some(Operation::Exec)
    } else if has(&["delete", "remove"]) {
        Some(Operation::Delete)
    } else if detect_errors && has(&["error", "exception"]) {
        Some(Operation::Error)
    } else {
        None
    }
}

fn operation_from_attributes(attributes: &Attributes) -> Option<Operation> {
    attributes
        .iter()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            key.contains("operation") || key.contains("action")
        })
        .filter_map(|(_, value)| value.as_str())
        .find(|value| !value.is_empty())
        .map(|value| Operation::from(value.to_lowercase().as_str()))
}
