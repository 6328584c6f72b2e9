//! codelens - code-aware OpenTelemetry trace correlator.
//!
//! codelens receives OTLP trace exports, links spans into trace trees and maps
//! every span onto the source files, lines and functions it touched, so a
//! trace can be read next to the code that produced it.
//!
//! # Features
//!
//! - **OTLP Protocol Support**: gRPC or HTTP (protobuf and JSON bodies)
//! - **Code Context**: file attributes and stack traces resolved to snippets
//! - **Bounded Memory**: span cap and retention-based eviction
//! - **Query API**: traces, files, search and a live WebSocket feed
//!
//! # Architecture
//!
//! - `receiver`: OTLP transports, dispatch and shutdown lifecycle
//! - `analyzer`: span to source-code context extraction
//! - `storage`: in-memory trace store, file index and search
//! - `api`: query HTTP surface and live updates
//! - `core`: domain models, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use codelens_lib::core::Config;
//! use codelens_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let app = Application::new(config)?;
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod analyzer;
pub mod api;
pub mod application;
pub mod cli;
pub mod core;
pub mod receiver;
pub mod storage;

// Re-export core types for convenience
pub use crate::application::Application;
pub use crate::core::{Config, Result};
