//! Client configuration and runtime records

use crate::core::protocol::Tool;
use crate::utils::errors::{McpError, McpResult};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

/// Mechanism used to reach a remote tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Local subprocess speaking JSON-RPC over stdio
    #[serde(alias = "stdio")]
    LocalProcess,
    /// Subprocess exec'd into a running container
    #[serde(alias = "docker")]
    ContainerExec,
    /// Remote endpoint over WebSocket or SSE
    #[serde(alias = "sse", alias = "websocket")]
    StreamingEndpoint,
    /// Package fetched and launched by an on-demand runner
    #[serde(alias = "npx")]
    PackageLaunch,
}

impl TransportKind {
    pub const ALL: [TransportKind; 4] = [
        TransportKind::LocalProcess,
        TransportKind::ContainerExec,
        TransportKind::StreamingEndpoint,
        TransportKind::PackageLaunch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::LocalProcess => "local-process",
            TransportKind::ContainerExec => "container-exec",
            TransportKind::StreamingEndpoint => "streaming-endpoint",
            TransportKind::PackageLaunch => "package-launch",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportKind {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local-process" | "local_process" | "stdio" => Ok(TransportKind::LocalProcess),
            "container-exec" | "container_exec" | "docker" => Ok(TransportKind::ContainerExec),
            "streaming-endpoint" | "streaming_endpoint" | "sse" | "websocket" => {
                Ok(TransportKind::StreamingEndpoint)
            }
            "package-launch" | "package_launch" | "npx" => Ok(TransportKind::PackageLaunch),
            _ => Err(McpError::UnsupportedTransport(s.to_string())),
        }
    }
}

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientStatus::Disconnected => write!(f, "disconnected"),
            ClientStatus::Connecting => write!(f, "connecting"),
            ClientStatus::Connected => write!(f, "connected"),
            ClientStatus::Error => write!(f, "error"),
        }
    }
}

/// Transport-specific connection parameters.
///
/// The accepted keys depend on the transport kind; lookups report
/// `MissingParameter`/`InvalidParameter` instead of falling back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ConnectionParams(HashMap<String, Value>);

impl ConnectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Optional string parameter; empty strings count as absent
    pub fn optional_str(&self, key: &str) -> McpResult<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(McpError::invalid(key, format!("expected a string, got {}", other))),
        }
    }

    pub fn require_str(&self, transport: TransportKind, key: &str) -> McpResult<String> {
        self.optional_str(key)?
            .ok_or_else(|| McpError::missing(transport.as_str(), key))
    }

    /// A string or a sequence of strings; absent means empty
    pub fn string_list(&self, key: &str) -> McpResult<Vec<String>> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    other => Err(McpError::invalid(
                        key,
                        format!("expected string items, got {}", other),
                    )),
                })
                .collect(),
            Some(other) => Err(McpError::invalid(
                key,
                format!("expected a string or a list of strings, got {}", other),
            )),
        }
    }

    /// `command` as argv; required and non-empty
    pub fn command(&self, transport: TransportKind) -> McpResult<Vec<String>> {
        let command: Vec<String> = self
            .string_list("command")?
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect();
        if command.is_empty() {
            return Err(McpError::missing(transport.as_str(), "command"));
        }
        Ok(command)
    }

    /// A string-to-scalar map such as `env` or `headers`
    pub fn string_map(&self, key: &str) -> McpResult<HashMap<String, String>> {
        match self.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(McpError::invalid(
                                key,
                                format!("value for '{}' must be a scalar, got {}", k, other),
                            ))
                        }
                    };
                    Ok((k.clone(), value))
                })
                .collect(),
            Some(other) => Err(McpError::invalid(key, format!("expected a map, got {}", other))),
        }
    }

    pub fn working_dir(&self) -> McpResult<Option<PathBuf>> {
        let dir = match self.optional_str("working_dir")? {
            Some(dir) => Some(dir),
            None => self.optional_str("cwd")?,
        };
        Ok(dir.map(|d| PathBuf::from(shellexpand::tilde(&d).to_string())))
    }
}

impl From<HashMap<String, Value>> for ConnectionParams {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for ConnectionParams {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn default_health_check_interval() -> u64 {
    30
}

/// Immutable description of a target server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ClientConfig {
    /// Display name
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(alias = "transport_type")]
    pub transport: TransportKind,
    #[serde(default, alias = "connection_config")]
    pub connection: ConnectionParams,
    /// Connect on registration and reconnect after failed health checks
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default = "default_health_check_interval", alias = "health_check_interval")]
    #[validate(range(min = 1))]
    pub health_check_interval_seconds: u64,
    #[serde(default)]
    pub is_default: bool,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            name: name.into(),
            transport,
            connection: ConnectionParams::default(),
            auto_connect: false,
            health_check_interval_seconds: default_health_check_interval(),
            is_default: false,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.connection.insert(key, value);
        self
    }

    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn health_check_interval(mut self, seconds: u64) -> Self {
        self.health_check_interval_seconds = seconds;
        self
    }

    pub fn default_client(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }
}

/// Runtime state of one configured client, handed out as a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ClientRecord {
    pub id: String,
    pub config: ClientConfig,
    pub status: ClientStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub tools: Vec<Tool>,
}

impl ClientRecord {
    pub fn new(id: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            id: id.into(),
            config,
            status: ClientStatus::Disconnected,
            last_seen: None,
            last_error: None,
            tools: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ClientStatus::Connected
    }
}

/// Lifecycle notifications broadcast by the service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Added { id: String },
    Removed { id: String },
    StatusChanged { id: String, status: ClientStatus },
    ToolsUpdated { id: String, count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str("stdio").unwrap(), TransportKind::LocalProcess);
        assert_eq!(TransportKind::from_str("Docker").unwrap(), TransportKind::ContainerExec);
        assert_eq!(
            TransportKind::from_str("streaming-endpoint").unwrap(),
            TransportKind::StreamingEndpoint
        );
        assert_eq!(TransportKind::from_str("npx").unwrap(), TransportKind::PackageLaunch);
        assert!(matches!(
            TransportKind::from_str("carrier-pigeon"),
            Err(McpError::UnsupportedTransport(_))
        ));
    }

    #[test]
    fn test_config_deserializes_legacy_names() {
        let config: ClientConfig = serde_json::from_value(json!({
            "name": "Remote",
            "transport_type": "sse",
            "connection_config": {"url": "http://localhost:8080/sse"},
            "health_check_interval": 60
        }))
        .unwrap();
        assert_eq!(config.transport, TransportKind::StreamingEndpoint);
        assert_eq!(config.health_check_interval_seconds, 60);
        assert!(!config.auto_connect);
    }

    #[test]
    fn test_config_validation() {
        let config = ClientConfig::new("fs", TransportKind::PackageLaunch);
        assert!(config.validate().is_ok());

        let zero = ClientConfig::new("fs", TransportKind::PackageLaunch).health_check_interval(0);
        assert!(zero.validate().is_err());

        let unnamed = ClientConfig::new("", TransportKind::LocalProcess);
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_command_accepts_string_or_sequence() {
        let params = ConnectionParams::new().with("command", "python");
        assert_eq!(params.command(TransportKind::LocalProcess).unwrap(), vec!["python"]);

        let params = ConnectionParams::new().with("command", json!(["uv", "run", "server.py"]));
        assert_eq!(
            params.command(TransportKind::LocalProcess).unwrap(),
            vec!["uv", "run", "server.py"]
        );

        let err = ConnectionParams::new()
            .with("command", json!([]))
            .command(TransportKind::ContainerExec)
            .unwrap_err();
        assert!(matches!(err, McpError::MissingParameter { parameter, .. } if parameter == "command"));
    }

    #[test]
    fn test_string_map_rejects_nested_values() {
        let params = ConnectionParams::new().with("env", json!({"DEBUG": 1, "MODE": "x"}));
        let env = params.string_map("env").unwrap();
        assert_eq!(env.get("DEBUG").map(String::as_str), Some("1"));

        let params = ConnectionParams::new().with("env", json!({"NESTED": {"a": 1}}));
        assert!(matches!(
            params.string_map("env"),
            Err(McpError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_empty_string_is_missing() {
        let params = ConnectionParams::new().with("url", "  ");
        assert!(matches!(
            params.require_str(TransportKind::StreamingEndpoint, "url"),
            Err(McpError::MissingParameter { .. })
        ));
    }
}
