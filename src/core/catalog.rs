//! Aggregated tool view and call routing

use crate::core::client::ClientStatus;
use crate::core::protocol::{CallToolResult, Tool};
use crate::core::service::ClientService;
use crate::utils::errors::McpResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info_span, warn, Instrument};

/// Tools of one connected client
#[derive(Debug, Clone, Serialize)]
pub struct ClientTools {
    pub name: String,
    pub tools: Vec<Tool>,
    pub count: usize,
}

impl ClientService {
    /// Refresh a client's tool cache.
    ///
    /// `Ok(None)` when the client has no live session. A failure is recorded
    /// on the client and the previous cache is kept.
    pub async fn discover_tools(&self, id: &str) -> McpResult<Option<usize>> {
        let slot = self.registry.require(id)?;
        if !self.manager.has_session(id) {
            warn!("Cannot discover tools for {}: no active session", id);
            return Ok(None);
        }
        self.manager
            .refresh_tools(&slot)
            .instrument(info_span!("discover_tools", client_id = %id))
            .await
            .map(Some)
    }

    /// Cached tools of a client, discovered first if the cache is empty.
    ///
    /// Empty when the client is not connected.
    pub async fn get_client_tools(&self, id: &str) -> McpResult<Vec<Tool>> {
        let slot = self.registry.require(id)?;
        if slot.status() != ClientStatus::Connected {
            return Ok(Vec::new());
        }
        if slot.tool_count() == 0 {
            if let Err(e) = self.discover_tools(id).await {
                warn!("Tool discovery for {} failed: {}", id, e);
            }
        }
        Ok(slot.snapshot().tools)
    }

    /// Invoke a tool on a connected client.
    ///
    /// A result flagged `is_error` by the server is still a successful call.
    pub async fn call_tool(&self, id: &str, tool: &str, arguments: Value) -> McpResult<CallToolResult> {
        let slot = self.registry.require(id)?;
        self.manager
            .call_tool(&slot, tool, arguments)
            .instrument(info_span!("call_tool", client_id = %id, tool = %tool))
            .await
    }

    /// Tools of every connected client keyed by client id.
    ///
    /// Clients whose discovery fails are logged and left out.
    pub async fn get_all_tools(&self) -> BTreeMap<String, ClientTools> {
        let mut all = BTreeMap::new();
        for slot in self.registry.slots() {
            if slot.status() != ClientStatus::Connected {
                continue;
            }
            let tools = match self.get_client_tools(slot.id()).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!("Skipping tools of {}: {}", slot.id(), e);
                    continue;
                }
            };
            all.insert(
                slot.id().to_string(),
                ClientTools {
                    name: slot.config().name,
                    count: tools.len(),
                    tools,
                },
            );
        }
        all
    }

    /// Ids of connected clients advertising `tool_name`, ordered by id
    pub fn find_tool(&self, tool_name: &str) -> Vec<String> {
        self.registry
            .slots()
            .iter()
            .map(|slot| slot.snapshot())
            .filter(|record| {
                record.is_connected() && record.tools.iter().any(|tool| tool.name == tool_name)
            })
            .map(|record| record.id)
            .collect()
    }
}
