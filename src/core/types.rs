//! Span, attribute and code-context types shared across the crate.

use crate::core::error::{CodelensError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{Duration, SystemTime};

/// Hex-rendered identifier of a trace (16 bytes on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

/// Hex-rendered identifier of a span within a trace (8 bytes on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

fn validate_hex(kind: &str, id: &str, max_len: usize) -> Result<String> {
    if id.len() > max_len {
        return Err(CodelensError::InvalidId(format!(
            "{kind} cannot exceed {max_len} characters, got {}",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodelensError::InvalidId(format!("{kind} must be hex: {id:?}")));
    }
    Ok(id.to_ascii_lowercase())
}

impl TraceId {
    /// Parses a hex trace id as it appears in API paths.
    pub fn new(id: String) -> Result<Self> {
        validate_hex("TraceId", &id, 32).map(TraceId)
    }

    /// Renders raw wire bytes. Never fails; empty input yields an empty id.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        TraceId(hex::encode(bytes))
    }

    /// Returns the hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SpanId {
    /// Parses a hex span id.
    pub fn new(id: String) -> Result<Self> {
        validate_hex("SpanId", &id, 16).map(SpanId)
    }

    /// Renders raw wire bytes. Never fails; empty input yields an empty id.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        SpanId(hex::encode(bytes))
    }

    /// Parent id from wire bytes: empty or all-zero bytes mean "no parent".
    pub fn parent_from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.iter().all(|b| *b == 0) {
            None
        } else {
            Some(Self::from_bytes(bytes))
        }
    }

    /// Returns the hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute value carried on spans, events and resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Floating point
    Double(f64),
    /// Arrays, maps and bytes, flattened for display
    Other(String),
}

impl AttributeValue {
    /// Returns the value only when it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) | AttributeValue::Other(s) => f.write_str(s),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Double(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

/// Ordered key/value attributes. Wire order is kept because the analyzer
/// reports contexts in the order attributes were declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    /// Creates an empty attribute set
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an attribute
    pub fn push<K: Into<String>, V: Into<AttributeValue>>(&mut self, key: K, value: V) {
        self.0.push((key.into(), value.into()));
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// First string value stored under `key`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(AttributeValue::as_str)
    }

    /// Iterates attributes in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no attribute is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// A timestamped annotation on a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    /// Event name, e.g. `exception`
    pub name: String,
    /// When the event happened
    pub time: SystemTime,
    /// Event attributes
    pub attributes: Attributes,
}

impl SpanEvent {
    /// Creates an event stamped with the current time
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            time: SystemTime::now(),
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute
    pub fn with_attribute<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.attributes.push(key, value);
        self
    }
}

/// Process or service that produced a span.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resource {
    /// `service.name`, or `unknown` when absent
    pub service_name: String,
    /// All resource attributes
    pub attributes: Attributes,
}

/// Domain view of one OTLP span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    /// Owning trace
    pub trace_id: TraceId,
    /// Span identity
    pub span_id: SpanId,
    /// Parent span, `None` for roots (absent or all-zero parent on the wire)
    pub parent_span_id: Option<SpanId>,
    /// Operation name
    pub name: String,
    /// Start timestamp
    pub start_time: SystemTime,
    /// End timestamp
    pub end_time: SystemTime,
    /// Span attributes
    pub attributes: Attributes,
    /// Span events
    pub events: Vec<SpanEvent>,
    /// Producing resource
    pub resource: Resource,
}

impl SpanRecord {
    /// Creates a new record builder
    pub fn builder() -> SpanRecordBuilder {
        SpanRecordBuilder::default()
    }

    /// Wall-clock duration, zero when the end precedes the start
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or(Duration::ZERO)
    }

    /// True when the span has no parent
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

/// Builder for [`SpanRecord`], mostly used by tests and the OTLP converter.
#[derive(Default)]
pub struct SpanRecordBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    parent_span_id: Option<SpanId>,
    name: String,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    attributes: Attributes,
    events: Vec<SpanEvent>,
    resource: Resource,
}

impl SpanRecordBuilder {
    /// Required
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Required
    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Omit for a root span
    pub fn parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Span name
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Defaults to now
    pub fn start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Defaults to the start time
    pub fn end_time(mut self, end_time: SystemTime) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Appends a span attribute
    pub fn attribute<K: Into<String>, V: Into<AttributeValue>>(mut self, key: K, value: V) -> Self {
        self.attributes.push(key, value);
        self
    }

    /// Appends an event
    pub fn event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Resource `service.name`
    pub fn service_name<S: Into<String>>(mut self, service_name: S) -> Self {
        self.resource.service_name = service_name.into();
        self
    }

    /// Fails without a trace or span id.
    pub fn build(self) -> Result<SpanRecord> {
        let start_time = self.start_time.unwrap_or_else(SystemTime::now);
        Ok(SpanRecord {
            trace_id: self
                .trace_id
                .ok_or_else(|| CodelensError::InvalidId("trace_id is required".to_string()))?,
            span_id: self
                .span_id
                .ok_or_else(|| CodelensError::InvalidId("span_id is required".to_string()))?,
            parent_span_id: self.parent_span_id,
            name: self.name,
            start_time,
            end_time: self.end_time.unwrap_or(start_time),
            attributes: self.attributes,
            events: self.events,
            resource: self.resource,
        })
    }
}

/// What a span was doing to a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    /// File was read
    Read,
    /// File was written or updated
    Write,
    /// File was executed
    Exec,
    /// File was deleted
    Delete,
    /// Error-like event
    Error,
    /// Stack-trace frame from an exception event
    Exception,
    /// Nothing could be inferred
    Unknown,
    /// Value of an explicit `operation`/`action` attribute, lowercased
    Other(String),
}

impl Operation {
    /// Wire/display name
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Exec => "exec",
            Operation::Delete => "delete",
            Operation::Error => "error",
            Operation::Exception => "exception",
            Operation::Unknown => "unknown",
            Operation::Other(s) => s,
        }
    }

    /// Error and exception contexts mark their trace as failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Operation::Error | Operation::Exception)
    }
}

impl From<&str> for Operation {
    fn from(s: &str) -> Self {
        match s {
            "read" => Operation::Read,
            "write" => Operation::Write,
            "exec" => Operation::Exec,
            "delete" => Operation::Delete,
            "error" => Operation::Error,
            "exception" => Operation::Exception,
            "unknown" | "" => Operation::Unknown,
            other => Operation::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Operation::from(s.as_str()))
    }
}

/// Link from a span to a location in a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSpanContext {
    /// Absolute path of the source file
    pub file_path: String,
    /// First line of the captured window (1-based)
    pub line_start: usize,
    /// Last line of the captured window
    pub line_end: usize,
    /// Enclosing function inferred from the snippet
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function_name: String,
    /// Span that produced this context
    pub span_id: SpanId,
    /// Trace of that span
    pub trace_id: TraceId,
    /// Inferred operation
    pub operation: Operation,
    /// Numbered source lines, empty when the file could not be read
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code_snapshot: String,
}

impl CodeSpanContext {
    /// Context for `file_path` with no line information yet
    pub fn new<S: Into<String>>(file_path: S, operation: Operation) -> Self {
        Self {
            file_path: file_path.into(),
            line_start: 0,
            line_end: 0,
            function_name: String::new(),
            span_id: SpanId::default(),
            trace_id: TraceId::default(),
            operation,
            code_snapshot: String::new(),
        }
    }

    /// True for error and exception contexts
    pub fn is_error(&self) -> bool {
        self.operation.is_error()
    }
}

/// Aggregate health of a trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    /// No error context seen
    #[default]
    Ok,
    /// At least one error or exception context
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_from_bytes() {
        let id = TraceId::from_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(id.as_str(), "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(TraceId::from_bytes(&[]).as_str(), "");
    }

    #[test]
    fn test_trace_id_validation() {
        assert!(TraceId::new("0102abcdef".to_string()).is_ok());
        assert_eq!(TraceId::new("ABCD".to_string()).unwrap().as_str(), "abcd");
        assert!(TraceId::new("not-hex".to_string()).is_err());
        assert!(TraceId::new("0".repeat(33)).is_err());
    }

    #[test]
    fn test_parent_sentinel() {
        assert!(SpanId::parent_from_bytes(&[]).is_none());
        assert!(SpanId::parent_from_bytes(&[0; 8]).is_none());
        assert_eq!(
            SpanId::parent_from_bytes(&[0, 0, 0, 0, 0, 0, 0, 1]).unwrap().as_str(),
            "0000000000000001"
        );
    }

    #[test]
    fn test_operation_round_trip_names() {
        assert_eq!(Operation::from("read"), Operation::Read);
        assert_eq!(Operation::from("copy"), Operation::Other("copy".to_string()));
        assert!(Operation::Exception.is_error());
        assert!(Operation::Error.is_error());
        assert!(!Operation::Write.is_error());
        assert_eq!(serde_json::to_string(&Operation::Exec).unwrap(), "\"exec\"");
    }

    #[test]
    fn test_attributes_keep_order() {
        let attrs: Attributes = vec![("b", "2"), ("a", "1")].into_iter().collect();
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(attrs.get_str("a"), Some("1"));
    }

    #[test]
    fn test_span_duration_saturates() {
        let now = SystemTime::now();
        let span = SpanRecord::builder()
            .trace_id(TraceId::from_bytes(&[1; 16]))
            .span_id(SpanId::from_bytes(&[1; 8]))
            .start_time(now)
            .end_time(now - Duration::from_secs(1))
            .build()
            .unwrap();
        assert_eq!(span.duration(), Duration::ZERO);
        assert!(span.is_root());
    }
}
