//! Configuration management for codelens.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (applied by `cli`)
//! - Validation and defaults

use crate::core::{CodelensError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default OTLP endpoint; the server side defaults to gRPC on localhost.
pub const DEFAULT_OTLP_ENDPOINT: &str = "grpc://localhost:4317";

/// Complete configuration for codelens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OTLP receiver configuration
    pub server: ServerConfig,
    /// Query API configuration
    pub api: ApiConfig,
    /// Trace store configuration
    pub storage: StorageConfig,
    /// Code analyzer configuration
    pub analyzer: AnalyzerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// OTLP receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Endpoint to listen on, e.g. `grpc://localhost:4317` or `http://0.0.0.0:4318`
    pub endpoint: String,
    /// Explicit protocol (`grpc`, `http/protobuf`, `http/json`); empty infers from the endpoint
    pub protocol: String,
}

/// Query API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Port for the query API and live channel
    pub port: u16,
    /// Origins allowed on the live channel and for CORS; `*` allows any
    pub allowed_origins: Vec<String>,
    /// Directory with the bundled UI, served at `/` when set
    pub ui_dir: Option<PathBuf>,
}

/// Trace store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum spans retained across all traces; 0 disables the cap
    pub max_spans: usize,
    /// Traces whose last span ended longer ago than this are evicted; 0 disables
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

/// Code analyzer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Root of the instrumented project; `None` accepts any absolute path
    pub project_root: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Emit every received OTLP log record through `tracing`
    pub echo_logs: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything
    Trace,
    /// Per-request detail
    Debug,
    /// Lifecycle events
    Info,
    /// Recoverable problems
    Warn,
    /// Failures only
    Error,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            protocol: String::new(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            ui_dir: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            max_spans: 10_000,
            retention: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            echo_logs: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.api.port == 0 {
            return Err(CodelensError::config("api.port must be greater than 0"));
        }

        if self.api.allowed_origins.is_empty() {
            return Err(CodelensError::config(
                "api.allowed_origins must list at least one origin (use \"*\" for any)",
            ));
        }

        // Surfaces the https rejection and malformed endpoints at startup.
        crate::receiver::ServerEndpoint::resolve(&self.server.protocol, &self.server.endpoint)?;

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Splits a comma-separated origin list; `*` stays a single wildcard.
pub fn split_allowed_origins(origins: &str) -> Vec<String> {
    if origins.trim() == "*" {
        return vec!["*".to_string()];
    }
    origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(String::from)
        .collect()
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| CodelensError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set OTLP endpoint
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.server.endpoint = endpoint.into();
        self
    }

    /// Set OTLP protocol
    pub fn protocol<S: Into<String>>(mut self, protocol: S) -> Self {
        self.config.server.protocol = protocol.into();
        self
    }

    /// Set API port
    pub fn api_port(mut self, port: u16) -> Self {
        self.config.api.port = port;
        self
    }

    /// Set allowed origins
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.config.api.allowed_origins = origins;
        self
    }

    /// Set UI directory
    pub fn ui_dir(mut self, dir: PathBuf) -> Self {
        self.config.api.ui_dir = Some(dir);
        self
    }

    /// Set max spans
    pub fn max_spans(mut self, count: usize) -> Self {
        self.config.storage.max_spans = count;
        self
    }

    /// Set retention
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.storage.retention = retention;
        self
    }

    /// Set project root
    pub fn project_root(mut self, root: PathBuf) -> Self {
        self.config.analyzer.project_root = Some(root);
        self
    }

    /// Echo received log records
    pub fn echo_logs(mut self, enable: bool) -> Self {
        self.config.logging.echo_logs = enable;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.max_spans, 10_000);
        assert_eq!(config.storage.retention, Duration::from_secs(3600));
        assert_eq!(config.api.allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_https_endpoint_rejected() {
        let result = ConfigBuilder::new().endpoint("https://localhost:4318").build();
        assert!(matches!(result, Err(CodelensError::Config(_))));
    }

    #[test]
    fn test_empty_origins_rejected() {
        assert!(ConfigBuilder::new().allowed_origins(vec![]).build().is_err());
    }

    #[test]
    fn test_split_allowed_origins() {
        assert_eq!(split_allowed_origins("*"), vec!["*"]);
        assert_eq!(
            split_allowed_origins("http://a.test, http://b.test,"),
            vec!["http://a.test", "http://b.test"]
        );
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  endpoint: "http://127.0.0.1:4318"
api:
  port: 9000
  allowed_origins: ["http://localhost:3000"]
storage:
  max_spans: 500
  retention: 24h
analyzer:
  project_root: /home/dev/app
logging:
  echo_logs: true
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.server.endpoint, "http://127.0.0.1:4318");
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.storage.max_spans, 500);
        assert_eq!(config.storage.retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.analyzer.project_root, Some(PathBuf::from("/home/dev/app")));
        assert!(config.logging.echo_logs);
    }
}
