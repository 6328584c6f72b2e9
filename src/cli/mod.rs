//! Command-line interface for codelens.
//!
//! Run `codelens` from the root of the instrumented project and point the
//! OTLP exporter at it.

use crate::application::Application;
use crate::core::config::{split_allowed_origins, ConfigBuilder, LogLevel};
use crate::core::{CodelensError, Config, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Receives OTLP traces and maps every span onto the source code it touched
#[derive(Parser, Debug, Default)]
#[command(name = "codelens")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/codelens/config.yaml)
    #[arg(short, long, env = "CODELENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// OTLP endpoint, e.g. grpc://localhost:4317 or http://0.0.0.0:4318
    #[arg(long, env = "CODELENS_OTLP_ENDPOINT")]
    pub endpoint: Option<String>,

    /// OTLP protocol (grpc, http/protobuf, http/json)
    #[arg(long, env = "CODELENS_OTLP_PROTOCOL")]
    pub protocol: Option<String>,

    /// Port for the query API and live updates
    #[arg(short, long, env = "CODELENS_PORT")]
    pub port: Option<u16>,

    /// Root of the instrumented project (default: current directory)
    #[arg(long, env = "CODELENS_PROJECT_ROOT")]
    pub project_root: Option<PathBuf>,

    /// Maximum spans kept in memory, 0 for no cap
    #[arg(long, env = "CODELENS_MAX_SPANS")]
    pub max_spans: Option<usize>,

    /// Drop traces older than this, e.g. 30m or 2h; 0s keeps everything
    #[arg(long, env = "CODELENS_RETENTION", value_parser = humantime::parse_duration)]
    pub retention: Option<Duration>,

    /// Comma-separated origins allowed on the API, `*` for any
    #[arg(long, env = "CODELENS_ALLOW_ORIGINS")]
    pub allow_origins: Option<String>,

    /// Directory with the web UI to serve at /
    #[arg(long, env = "CODELENS_UI_DIR")]
    pub ui_dir: Option<PathBuf>,

    /// Write received OTLP log records to the console
    #[arg(long, env = "CODELENS_ECHO_LOGS")]
    pub echo_logs: bool,

    /// Enable debug logging
    #[arg(short, long, env = "CODELENS_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments and their environment variables
    /// 2. Config file
    /// 3. Defaults
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("codelens").join("config.yaml"))
                .filter(|p| p.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    tracing::info!("Loaded configuration from: {:?}", path);
                },
                Err(e) if self.config.is_some() => {
                    return Err(CodelensError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                },
                Err(e) => {
                    tracing::debug!("Ignoring unreadable config file {:?}: {}", path, e);
                },
            }
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.as_str());
        }
        if let Some(protocol) = &self.protocol {
            builder = builder.protocol(protocol.as_str());
        }
        if let Some(port) = self.port {
            builder = builder.api_port(port);
        }
        if let Some(root) = &self.project_root {
            builder = builder.project_root(root.clone());
        }
        if let Some(max_spans) = self.max_spans {
            builder = builder.max_spans(max_spans);
        }
        if let Some(retention) = self.retention {
            builder = builder.retention(retention);
        }
        if let Some(origins) = &self.allow_origins {
            builder = builder.allowed_origins(split_allowed_origins(origins));
        }
        if let Some(dir) = &self.ui_dir {
            builder = builder.ui_dir(dir.clone());
        }
        if self.echo_logs {
            builder = builder.echo_logs(true);
        }

        let mut config = builder.debug(self.debug).build()?;
        if config.analyzer.project_root.is_none() {
            config.analyzer.project_root = Some(std::env::current_dir()?);
        }
        Ok(config)
    }

    /// Filter directive used when `RUST_LOG` is unset: `--debug`, then
    /// `CODELENS_LOG_LEVEL`, then `logging.level` from the config.
    pub fn log_directive(&self, configured: LogLevel) -> String {
        resolve_log_directive(self.debug, std::env::var("CODELENS_LOG_LEVEL").ok(), configured)
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let directive = self.log_directive(config.logging.level);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(self.debug)
            .with_line_number(self.debug)
            .compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| CodelensError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

fn resolve_log_directive(debug: bool, env_level: Option<String>, configured: LogLevel) -> String {
    if debug {
        return LogLevel::Debug.as_str().to_string();
    }
    env_level
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| configured.as_str().to_string())
}

/// Execute codelens.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        println!("Configuration is valid!");
        println!("  OTLP endpoint: {}", config.server.endpoint);
        println!("  API port: {}", config.api.port);
        println!("  Max spans: {}", config.storage.max_spans);
        println!("  Retention: {}", humantime::format_duration(config.storage.retention));
        if let Some(root) = &config.analyzer.project_root {
            println!("  Project root: {}", root.display());
        }
        return Ok(());
    }

    Application::new(config)?.run().await
}
