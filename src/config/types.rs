use crate::core::client::{ClientConfig, TransportKind};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

/// A client definition keyed by its registry id
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClientEntry {
    pub id: String,
    #[serde(flatten)]
    pub config: ClientConfig,
}

/// Service-wide tuning
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ServiceSettings {
    /// Global health sweep cadence
    pub health_check_interval_seconds: u64,
    /// Time a subprocess gets to exit after SIGTERM before it is killed
    pub shutdown_grace_seconds: u64,
    /// Per-request timeout on an established session
    pub request_timeout_seconds: u64,
    /// Budget for starting a session and completing `initialize`
    pub connect_timeout_seconds: u64,
    /// Runner argv prepended to package-launch invocations
    pub package_runner: Vec<String>,
    /// Container CLI used when a container-exec client names a `container`
    pub container_engine: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 30,
            shutdown_grace_seconds: 5,
            request_timeout_seconds: 30,
            connect_timeout_seconds: 30,
            package_runner: vec!["npx".to_string(), "-y".to_string()],
            container_engine: "docker".to_string(),
        }
    }
}

impl ServiceSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl AppConfig {
    /// Sample configuration covering every transport kind
    pub fn example() -> Self {
        Self {
            service: ServiceSettings::default(),
            clients: vec![
                ClientEntry {
                    id: "archon".to_string(),
                    config: ClientConfig::new("Archon", TransportKind::ContainerExec)
                        .param("container", "archon-pyserver")
                        .param("command", json!(["python", "/app/src/main.py"]))
                        .param("working_dir", "/app")
                        .auto_connect(true)
                        .default_client(true),
                },
                ClientEntry {
                    id: "remote".to_string(),
                    config: ClientConfig::new("Remote MCP Server", TransportKind::StreamingEndpoint)
                        .param("url", "http://localhost:8080/sse")
                        .health_check_interval(60),
                },
                ClientEntry {
                    id: "fs".to_string(),
                    config: ClientConfig::new("Filesystem", TransportKind::PackageLaunch)
                        .param("package", "@modelcontextprotocol/server-filesystem")
                        .param("args", json!(["/tmp"])),
                },
                ClientEntry {
                    id: "local".to_string(),
                    config: ClientConfig::new("Local Server", TransportKind::LocalProcess)
                        .param("command", "python")
                        .param("args", json!(["-m", "my_mcp_server"]))
                        .param("env", json!({"LOG_LEVEL": "debug"})),
                },
            ],
        }
    }
}
