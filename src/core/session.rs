//! MCP client session over any [`Transport`]

use crate::core::protocol::{
    CallToolResult, Implementation, InitializeParams, InitializeResult, JsonRpcRequest,
    ListToolsResult, Tool, PROTOCOL_VERSION,
};
use crate::transport::traits::Transport;
use crate::utils::errors::{McpError, McpResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Upper bound on `tools/list` pages followed in one discovery
const MAX_TOOL_PAGES: usize = 64;

/// A live protocol connection to one remote tool server
#[async_trait]
pub trait Session: Send + Sync {
    /// Perform the protocol handshake
    async fn initialize(&self) -> McpResult<InitializeResult>;

    /// Every tool the server advertises
    async fn list_tools(&self) -> McpResult<Vec<Tool>>;

    /// Invoke a tool
    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult>;

    /// Whether the underlying stream is still open
    fn is_alive(&self) -> bool;

    /// Release the underlying stream
    async fn close(&self) -> McpResult<()>;
}

/// [`Session`] speaking MCP JSON-RPC over a transport
pub struct McpSession {
    label: String,
    transport: Box<dyn Transport>,
}

impl McpSession {
    pub fn new(label: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            label: label.into(),
            transport,
        }
    }

    async fn request(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let request = JsonRpcRequest::request(method, params);
        let response = self.transport.send_request(request).await?;
        if let Some(error) = response.error {
            return Err(McpError::Protocol {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Session for McpSession {
    async fn initialize(&self) -> McpResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: Implementation::this_client(),
        };

        let result = self
            .request("initialize", Some(serde_json::to_value(&params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(result)?;

        if result.protocol_version != PROTOCOL_VERSION {
            debug!(
                "[{}] Server negotiated protocol {}",
                self.label, result.protocol_version
            );
        }

        self.transport
            .send_notification(JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await?;

        info!(
            "[{}] Session initialized with {}",
            self.label,
            result
                .server_info
                .as_ref()
                .map(|s| format!("{} {}", s.name, s.version))
                .unwrap_or_else(|| "unknown server".to_string())
        );
        Ok(result)
    }

    async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen_cursors = HashSet::new();

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if seen_cursors.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!("[{}] tools/list repeated cursor {}, stopping", self.label, next);
                    break;
                }
                None => return Ok(tools),
            }
        }

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<CallToolResult> {
        let result = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    fn is_alive(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&self) -> McpResult<()> {
        self.transport.close().await
    }
}
