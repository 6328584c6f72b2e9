//! Core domain models, configuration and errors for codelens.
//!
//! This module contains the fundamental types shared by the receiver,
//! the analyzer and the trace store.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{CodelensError, Result};
pub use types::{
    AttributeValue, Attributes, CodeSpanContext, Operation, Resource, SpanEvent, SpanId,
    SpanRecord, TraceId, TraceStatus,
};
