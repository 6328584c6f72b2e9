//! Configuration system tests.

use codelens_lib::core::config::LogLevel;
use codelens_lib::core::{CodelensError, Config, ConfigBuilder};
use codelens_lib::receiver::{Protocol, ServerEndpoint};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.server.endpoint, "grpc://localhost:4317");
    assert_eq!(config.api.port, 8080);
    assert_eq!(config.storage.max_spans, 10_000);
    assert_eq!(config.storage.retention, Duration::from_secs(3600));
    assert_eq!(config.analyzer.project_root, None);
    assert!(!config.logging.echo_logs);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .endpoint("http://0.0.0.0:4318")
        .api_port(9090)
        .max_spans(0)
        .retention(Duration::ZERO)
        .project_root(PathBuf::from("/work/shop"))
        .ui_dir(PathBuf::from("/opt/codelens/ui"))
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.api.port, 9090);
    assert_eq!(config.storage.max_spans, 0);
    assert_eq!(config.api.ui_dir, Some(PathBuf::from("/opt/codelens/ui")));
    assert!(config.debug);

    let endpoint = ServerEndpoint::resolve(&config.server.protocol, &config.server.endpoint).unwrap();
    assert_eq!(endpoint.protocol, Protocol::Http);
    assert_eq!(endpoint.address, "0.0.0.0:4318");
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
server:
  endpoint: "localhost:5317"
  protocol: "http/json"
api:
  allowed_origins:
    - "http://localhost:3000"
    - "http://127.0.0.1:3000"
storage:
  retention: 90m
logging:
  level: debug
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
    assert_eq!(config.api.allowed_origins.len(), 2);
    assert_eq!(config.storage.retention, Duration::from_secs(90 * 60));
    assert_eq!(config.storage.max_spans, 10_000);
    assert!(matches!(config.logging.level, LogLevel::Debug));

    let endpoint = ServerEndpoint::resolve(&config.server.protocol, &config.server.endpoint).unwrap();
    assert_eq!(endpoint.protocol, Protocol::Http);
}

#[test]
fn test_config_validation() {
    assert!(matches!(
        ConfigBuilder::new().api_port(0).build(),
        Err(CodelensError::Config(_))
    ));
    assert!(ConfigBuilder::new().protocol("https").build().is_err());
    assert!(ConfigBuilder::new().endpoint("grpc://").build().is_err());
}

#[test]
fn test_error_handling() {
    let result = ConfigBuilder::new().from_yaml("invalid: yaml: content: [");
    assert!(result.is_err());

    let result = ConfigBuilder::new().from_yaml("storage:\n  retention: soon\n");
    assert!(result.is_err());
}
