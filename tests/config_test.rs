//! Loading configuration files into a running service

use std::io::Write;
use supermcp_client::cli::commands::load_config;
use supermcp_client::config::{AppConfig, ConfigManager};
use supermcp_client::core::client::{ClientStatus, TransportKind};
use supermcp_client::core::service::ClientService;
use supermcp_client::utils::errors::McpError;

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

const CLIENTS_YAML: &str = r#"
service:
  health_check_interval_seconds: 10
clients:
  - id: fs
    name: Filesystem
    transport: npx
    connection:
      package: pkg-filesystem
      args: ["/tmp"]
  - id: bad
    name: Bad
    transport: streaming-endpoint
    is_default: true
  - id: archon
    name: Archon
    transport: docker
    connection_config:
      container: archon-pyserver
      command: [python, /app/src/main.py]
"#;

#[test]
fn test_load_yaml_with_legacy_names() {
    let file = write_config(".yaml", CLIENTS_YAML);
    let config = load_config(file.path().to_str()).unwrap();

    assert_eq!(config.service.health_check_interval_seconds, 10);
    assert_eq!(config.service.package_runner, vec!["npx", "-y"]);
    let kinds: Vec<_> = config.clients.iter().map(|c| c.config.transport).collect();
    assert_eq!(
        kinds,
        vec![
            TransportKind::PackageLaunch,
            TransportKind::StreamingEndpoint,
            TransportKind::ContainerExec,
        ]
    );
}

#[tokio::test]
async fn test_service_registers_loaded_clients() {
    let file = write_config(".yaml", CLIENTS_YAML);
    let config = load_config(file.path().to_str()).unwrap();

    let service = ClientService::new(config.service.clone());
    let failures = service.load_clients(&config).await;
    assert!(failures.is_empty());

    let ids: Vec<_> = service.list_clients().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["archon", "bad", "fs"]);
    assert_eq!(service.default_client().unwrap().id, "bad");
    assert!(service
        .list_clients()
        .iter()
        .all(|c| c.status == ClientStatus::Disconnected));
}

#[test]
fn test_invalid_interval_rejected() {
    let file = write_config(
        ".toml",
        r#"
[[clients]]
id = "fs"
name = "Filesystem"
transport = "package-launch"
health_check_interval_seconds = 0
"#,
    );
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, McpError::InvalidConfig(ref msg) if msg.contains("fs")));
}

#[test]
fn test_unknown_transport_rejected() {
    let file = write_config(
        ".json",
        r#"{"clients": [{"id": "x", "name": "X", "transport": "carrier-pigeon"}]}"#,
    );
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, McpError::ConfigError(_)));
}

#[test]
fn test_example_is_valid() {
    let example = AppConfig::example();
    ConfigManager::validate(&example).unwrap();
    assert_eq!(example.clients.len(), 4);
}
