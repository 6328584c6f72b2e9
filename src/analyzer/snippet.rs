//! Source snippet capture and function-name inference.

use crate::core::CodeSpanContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Lines shown when the end of the window is unknown.
const DEFAULT_WINDOW: usize = 20;
/// Largest window ever captured.
const MAX_WINDOW: usize = 50;
/// Lines of lead-in captured before the window start.
const LEAD_IN: usize = 5;

static GO_FUNC: Lazy<Regex> = Lazy::new(|| Regex::new(r"func\s+([A-Za-z0-9_]+)").unwrap());
static JS_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"function\s+([A-Za-z0-9_]+)|([A-Za-z0-9_]+)\s*=\s*\(.*\)\s*=>|([A-Za-z0-9_]+)\s*\(.*\)\s*\{",
    )
    .unwrap()
});
static DEF_FUNC: Lazy<Regex> = Lazy::new(|| Regex::new(r"def\s+([A-Za-z0-9_]+)").unwrap());
static C_FAMILY_FUNC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_<>]+\s+([A-Za-z0-9_]+)\s*\(").unwrap());
static GENERIC_FUNC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"function\s+([A-Za-z0-9_]+)|\s+([A-Za-z0-9_]+)\s*\(").unwrap());

/// Reads the window around `context` and infers the enclosing function.
///
/// Unreadable or missing files leave the context untouched.
pub fn enrich_with_file_contents(context: &mut CodeSpanContext) {
    if context.file_path.is_empty() {
        return;
    }
    let path = Path::new(&context.file_path);
    if !path.is_file() {
        return;
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Cannot open {}: {}", context.file_path, e);
            return;
        },
    };

    if context.line_start == 0 {
        context.line_start = 1;
    }
    if context.line_end <= context.line_start {
        context.line_end = context.line_start.saturating_add(DEFAULT_WINDOW);
    }
    if context.line_end - context.line_start > MAX_WINDOW {
        context.line_end = context.line_start.saturating_add(MAX_WINDOW);
    }

    let first = context.line_start.saturating_sub(LEAD_IN);
    let mut lines = Vec::new();
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line_num = idx + 1;
        if line_num > context.line_end {
            break;
        }
        let Ok(raw) = line else {
            break;
        };
        if line_num >= first {
            let text = String::from_utf8_lossy(&raw);
            lines.push(format!("{}: {}", line_num, text.trim_end_matches('\r')));
        }
    }

    context.code_snapshot = lines.join("\n");
    if let Some(name) = infer_function_name(&context.file_path, &context.code_snapshot) {
        context.function_name = name;
    }
}

/// First declaration-looking match in `snippet`, chosen by file extension.
pub fn infer_function_name(file_path: &str, snippet: &str) -> Option<String> {
    if snippet.is_empty() {
        return None;
    }

    let ext = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let regex: &Regex = match ext.as_str() {
        "go" => &GO_FUNC,
        "js" | "ts" | "jsx" | "tsx" => &JS_FUNC,
        "py" | "rb" => &DEF_FUNC,
        "java" | "kt" | "c" | "cpp" | "cc" => &C_FAMILY_FUNC,
        _ => &GENERIC_FUNC,
    };

    let captures = regex.captures(snippet)?;
    captures
        .iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
