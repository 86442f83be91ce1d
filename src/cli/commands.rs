//! Subcommand implementations

use crate::cli::args::OutputFormat;
use crate::config::{AppConfig, ConfigManager};
use crate::core::protocol::CallToolResult;
use crate::core::service::ClientService;
use crate::utils::errors::{McpError, McpResult};
use crate::utils::shutdown::ShutdownCoordinator;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Load the configuration from `path` or the default location
pub fn load_config(path: Option<&str>) -> McpResult<AppConfig> {
    match path {
        Some(path) => ConfigManager::load(path),
        None => ConfigManager::load(ConfigManager::default_path().to_string_lossy()),
    }
}

/// Parse `--args`; absent means no arguments
pub fn parse_tool_args(raw: Option<&str>) -> McpResult<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    match serde_json::from_str(raw)? {
        Value::Object(map) => Ok(Value::Object(map)),
        other => Err(McpError::InvalidConfig(format!(
            "tool arguments must be a JSON object, got {}",
            other
        ))),
    }
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> McpResult<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| McpError::ConfigError(format!("failed to render YAML: {}", e))),
    }
}

/// Text content items as-is, anything else as JSON
pub fn render_result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .map(|item| match item.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => serde_json::to_string_pretty(item).unwrap_or_default(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Register every configured client without auto-connecting
async fn register_passive(service: &ClientService, config: &AppConfig) {
    for entry in &config.clients {
        let client = entry.config.clone().auto_connect(false);
        if let Err(e) = service.add_client(&entry.id, client).await {
            warn!("Failed to register client {}: {}", entry.id, e);
        }
    }
}

/// Connect configured clients and supervise them until a shutdown signal
pub async fn serve(config: AppConfig) -> McpResult<()> {
    let service = Arc::new(ClientService::new(config.service.clone()));

    let mut events = service.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(?event, "Client event");
        }
    });

    service.start().await;
    let failures = service.load_clients(&config).await;

    let clients = service.list_clients();
    let connected = clients.iter().filter(|c| c.is_connected()).count();
    info!(
        "Managing {} clients ({} connected, {} rejected)",
        clients.len(),
        connected,
        failures.len()
    );

    let shutdown = ShutdownCoordinator::new();
    shutdown.wait_for_shutdown_signal().await;

    info!("Shutting down");
    service.stop().await;
    event_log.abort();
    Ok(())
}

async fn collect_tools(
    service: &ClientService,
    client: Option<&str>,
    format: OutputFormat,
) -> McpResult<String> {
    match client {
        Some(id) => {
            service.connect_client(id).await?;
            let tools = service.get_client_tools(id).await?;
            render(&tools, format)
        }
        None => {
            for record in service.list_clients() {
                if let Err(e) = service.connect_client(&record.id).await {
                    warn!("Skipping {}: {}", record.id, e);
                }
            }
            render(&service.get_all_tools().await, format)
        }
    }
}

/// Print the tools of one client or of every client
pub async fn list_tools(
    config: AppConfig,
    client: Option<&str>,
    format: OutputFormat,
) -> McpResult<()> {
    let service = ClientService::new(config.service.clone());
    register_passive(&service, &config).await;

    let result = collect_tools(&service, client, format).await;
    service.stop().await;
    println!("{}", result?);
    Ok(())
}

async fn connect_and_call(
    service: &ClientService,
    client: &str,
    tool: &str,
    arguments: Value,
) -> McpResult<CallToolResult> {
    service.connect_client(client).await?;
    service.call_tool(client, tool, arguments).await
}

/// Call one tool and print its result
pub async fn call_tool(
    config: AppConfig,
    client: &str,
    tool: &str,
    raw_args: Option<&str>,
    json: bool,
) -> McpResult<()> {
    let arguments = parse_tool_args(raw_args)?;
    let service = ClientService::new(config.service.clone());
    register_passive(&service, &config).await;

    let result = connect_and_call(&service, client, tool, arguments).await;
    service.stop().await;
    let result = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render_result_text(&result));
    }

    if result.is_error {
        return Err(McpError::CallFailure {
            tool: tool.to_string(),
            message: "server reported an error result".to_string(),
        });
    }
    Ok(())
}
