//! Connection state machine and the session/process tables

use crate::config::ServiceSettings;
use crate::core::client::ClientStatus;
use crate::core::protocol::{CallToolResult, Tool};
use crate::core::registry::ClientSlot;
use crate::core::session::Session;
use crate::transport::factory::TransportRegistry;
use crate::transport::process::ManagedProcess;
use crate::utils::errors::{McpError, McpResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Session and process removed from the tables, awaiting teardown
#[derive(Default)]
pub(crate) struct Detached {
    session: Option<Arc<dyn Session>>,
    process: Option<ManagedProcess>,
}

impl Detached {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.process.is_none()
    }

    /// Close the session, then stop the process. Failures are only logged.
    pub async fn teardown(self, client_id: &str, grace: Duration) {
        if let Some(session) = self.session {
            if let Err(e) = session.close().await {
                warn!("[{}] Failed to close session: {}", client_id, e);
            }
        }
        if let Some(process) = self.process {
            if let Err(e) = process.terminate(grace).await {
                warn!("[{}] Failed to terminate process: {}", client_id, e);
            }
        }
    }
}

/// Releases a half-built connection when a connect future is dropped
struct ConnectGuard<'a> {
    manager: &'a ConnectionManager,
    slot: &'a ClientSlot,
    armed: bool,
}

impl ConnectGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let id = self.slot.id().to_string();
        warn!("[{}] Connect cancelled", id);
        let detached = self.manager.detach(&id);
        self.slot.mark_error("connect cancelled");

        if detached.is_empty() {
            return;
        }
        // Without a runtime the process is still killed on drop.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let grace = self.manager.settings.shutdown_grace();
            handle.spawn(async move { detached.teardown(&id, grace).await });
        }
    }
}

/// Drives clients through `Disconnected -> Connecting -> Connected | Error`.
///
/// Operations taking a slot expect the caller to hold that slot's lock.
pub struct ConnectionManager {
    transports: TransportRegistry,
    settings: ServiceSettings,
    sessions: DashMap<String, Arc<dyn Session>>,
    processes: DashMap<String, ManagedProcess>,
}

impl ConnectionManager {
    pub fn new(transports: TransportRegistry, settings: ServiceSettings) -> Self {
        Self {
            transports,
            settings,
            sessions: DashMap::new(),
            processes: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn session(&self, id: &str) -> Option<Arc<dyn Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn has_process(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    /// Remove both table entries for `id` without awaiting anything
    pub(crate) fn detach(&self, id: &str) -> Detached {
        Detached {
            session: self.sessions.remove(id).map(|(_, session)| session),
            process: self.processes.remove(id).map(|(_, process)| process),
        }
    }

    /// Connect a client. A no-op when it is already connected.
    pub async fn connect_locked(&self, slot: &ClientSlot) -> McpResult<()> {
        let id = slot.id();
        if slot.status() == ClientStatus::Connected && self.has_session(id) {
            debug!("[{}] Already connected", id);
            return Ok(());
        }

        // Leftovers of an earlier failed probe.
        let stale = self.detach(id);
        if !stale.is_empty() {
            stale.teardown(id, self.settings.shutdown_grace()).await;
        }

        info!("[{}] Connecting", id);
        slot.mark_connecting();

        let mut guard = ConnectGuard {
            manager: self,
            slot,
            armed: true,
        };

        let result = self.establish(slot).await;
        guard.disarm();

        match result {
            Ok(tools) => {
                info!("[{}] Connected with {} tools", id, tools.len());
                slot.mark_connected(tools);
                Ok(())
            }
            Err(e) => {
                error!("[{}] Connect failed: {}", id, e);
                let detached = self.detach(id);
                slot.mark_error(e.to_string());
                detached.teardown(id, self.settings.shutdown_grace()).await;
                Err(e)
            }
        }
    }

    /// Factory lookup, session creation, `initialize` and tool discovery
    async fn establish(&self, slot: &ClientSlot) -> McpResult<Vec<Tool>> {
        let id = slot.id();
        let config = slot.config();
        let connect_timeout = self.settings.connect_timeout();

        let factory = self.transports.get(config.transport)?;
        let handle = match tokio::time::timeout(
            connect_timeout,
            factory.create(id, &config.connection, &self.settings),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) if e.is_parameter_error() || matches!(e, McpError::SpawnFailure(_)) => {
                return Err(e)
            }
            Ok(Err(e)) => return Err(McpError::SpawnFailure(e.to_string())),
            Err(_) => {
                return Err(McpError::SpawnFailure(format!(
                    "{} session not ready within {:?}",
                    config.transport, connect_timeout
                )))
            }
        };

        let session = handle.session;
        if let Some(process) = handle.process {
            self.processes.insert(id.to_string(), process);
        }
        self.sessions.insert(id.to_string(), session.clone());

        match tokio::time::timeout(connect_timeout, session.initialize()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(McpError::InitializeFailure(e.to_string())),
            Err(_) => {
                return Err(McpError::InitializeFailure(format!(
                    "no response within {:?}",
                    connect_timeout
                )))
            }
        }

        session
            .list_tools()
            .await
            .map_err(|e| McpError::DiscoveryFailure(e.to_string()))
    }

    /// Tear a client down to `Disconnected`; always succeeds
    pub async fn disconnect_locked(&self, slot: &ClientSlot) {
        let id = slot.id();
        let detached = self.detach(id);
        let was = slot.status();
        slot.mark_disconnected();

        if was != ClientStatus::Disconnected || !detached.is_empty() {
            info!("[{}] Disconnected", id);
        }
        detached.teardown(id, self.settings.shutdown_grace()).await;
    }

    /// Drop the session after a failed probe and mark the client `Error`
    pub(crate) async fn fail_locked(&self, slot: &ClientSlot, reason: &str) {
        let id = slot.id();
        let detached = self.detach(id);
        slot.mark_error(reason);
        detached.teardown(id, self.settings.shutdown_grace()).await;
    }

    /// Re-run `tools/list` and replace the cache.
    ///
    /// The result is only committed if the session queried is still the
    /// client's current one.
    pub async fn refresh_tools(&self, slot: &ClientSlot) -> McpResult<usize> {
        let id = slot.id();
        let session = self
            .session(id)
            .ok_or_else(|| McpError::NotConnected(id.to_string()))?;

        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let err = McpError::DiscoveryFailure(e.to_string());
                slot.record_error(err.to_string());
                return Err(err);
            }
        };

        let current = self
            .session(id)
            .is_some_and(|s| Arc::ptr_eq(&s, &session));
        if !current || slot.status() != ClientStatus::Connected {
            debug!("[{}] Session changed during discovery, dropping result", id);
            return Ok(slot.tool_count());
        }

        let count = tools.len();
        slot.replace_tools(tools);
        debug!("[{}] Discovered {} tools", id, count);
        Ok(count)
    }

    /// Forward a tool call on the client's live session
    pub async fn call_tool(
        &self,
        slot: &ClientSlot,
        tool: &str,
        arguments: Value,
    ) -> McpResult<CallToolResult> {
        let id = slot.id();
        if slot.status() != ClientStatus::Connected {
            return Err(McpError::NotConnected(id.to_string()));
        }
        let session = self
            .session(id)
            .ok_or_else(|| McpError::NotConnected(id.to_string()))?;

        debug!("[{}] Calling tool {}", id, tool);
        match session.call_tool(tool, arguments).await {
            Ok(result) => {
                slot.touch();
                Ok(result)
            }
            Err(e) => {
                let err = McpError::CallFailure {
                    tool: tool.to_string(),
                    message: e.to_string(),
                };
                slot.record_error(err.to_string());
                Err(err)
            }
        }
    }
}
