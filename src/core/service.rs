//! The client service: registry, lifecycle and supervision behind one API

use crate::config::{AppConfig, ServiceSettings};
use crate::core::client::{ClientConfig, ClientEvent, ClientRecord};
use crate::core::lifecycle::ConnectionManager;
use crate::core::registry::{ClientRegistry, ClientSlot};
use crate::core::supervisor::{HealthSupervisor, SupervisorHandle, SweepReport};
use crate::transport::factory::TransportRegistry;
use crate::utils::errors::{McpError, McpResult};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, info_span, warn, Instrument};
use validator::Validate;

/// Manages every configured client.
///
/// Built once at startup and shared by reference; `start` spawns the health
/// supervisor and `stop` tears everything down.
pub struct ClientService {
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) manager: Arc<ConnectionManager>,
    supervisor: Arc<HealthSupervisor>,
    running: Mutex<Option<SupervisorHandle>>,
}

impl ClientService {
    /// Service with the built-in transport factories
    pub fn new(settings: ServiceSettings) -> Self {
        Self::with_transports(TransportRegistry::with_defaults(), settings)
    }

    pub fn with_transports(transports: TransportRegistry, settings: ServiceSettings) -> Self {
        let interval = settings.health_check_interval();
        let registry = Arc::new(ClientRegistry::new());
        let manager = Arc::new(ConnectionManager::new(transports, settings));
        let supervisor = Arc::new(HealthSupervisor::new(
            registry.clone(),
            manager.clone(),
            interval,
        ));

        Self {
            registry,
            manager,
            supervisor,
            running: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        self.manager.settings()
    }

    /// Start the health supervisor; a no-op when already running
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *running = Some(self.supervisor.clone().spawn());
        info!("Client service started");
    }

    /// Stop supervision and disconnect every client; safe to call twice
    pub async fn stop(&self) {
        let handle = self.running.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        let slots = self.registry.slots();
        join_all(slots.iter().map(|slot| async move {
            let _guard = slot.lock().await;
            self.manager.disconnect_locked(slot).await;
        }))
        .await;

        info!("Client service stopped");
    }

    /// Register every client of a loaded configuration.
    ///
    /// Returns the ids that could not be registered with the reason.
    pub async fn load_clients(&self, config: &AppConfig) -> Vec<(String, McpError)> {
        let mut failures = Vec::new();
        for entry in &config.clients {
            if let Err(e) = self.add_client(&entry.id, entry.config.clone()).await {
                warn!("Failed to register client {}: {}", entry.id, e);
                failures.push((entry.id.clone(), e));
            }
        }
        failures
    }

    /// Register a client, connecting it right away when `auto_connect` is set.
    ///
    /// A failed auto-connect is recorded on the client, not returned.
    pub async fn add_client(&self, id: &str, config: ClientConfig) -> McpResult<ClientRecord> {
        if id.trim().is_empty() {
            return Err(McpError::InvalidConfig("client id must not be empty".to_string()));
        }
        config.validate()?;

        let auto_connect = config.auto_connect;
        let slot = self.registry.insert(id, config)?;
        info!("Added client {} ({})", id, slot.config().transport);

        if auto_connect {
            if let Err(e) = self.connect_slot(&slot).await {
                warn!("Auto-connect of {} failed: {}", id, e);
            }
        }
        Ok(slot.snapshot())
    }

    /// Disconnect and delete a client; false if it was not registered
    pub async fn remove_client(&self, id: &str) -> bool {
        let Some(slot) = self.registry.get(id) else {
            return false;
        };

        async {
            let _guard = slot.lock().await;
            if slot.is_retired() {
                return false;
            }
            slot.retire();
            self.registry.remove_if_same(&slot);
            self.manager.disconnect_locked(&slot).await;
            info!("Removed client {}", id);
            true
        }
        .instrument(info_span!("remove_client", client_id = %id))
        .await
    }

    pub fn get_client(&self, id: &str) -> Option<ClientRecord> {
        self.registry.get(id).map(|slot| slot.snapshot())
    }

    /// Snapshots of every client, ordered by id
    pub fn list_clients(&self) -> Vec<ClientRecord> {
        self.registry.slots().iter().map(|slot| slot.snapshot()).collect()
    }

    /// The first client (by id) flagged `is_default`
    pub fn default_client(&self) -> Option<ClientRecord> {
        self.registry
            .slots()
            .iter()
            .map(|slot| slot.snapshot())
            .find(|record| record.config.is_default)
    }

    pub async fn connect_client(&self, id: &str) -> McpResult<()> {
        let slot = self.registry.require(id)?;
        self.connect_slot(&slot).await
    }

    async fn connect_slot(&self, slot: &ClientSlot) -> McpResult<()> {
        async {
            let _guard = slot.lock().await;
            if slot.is_retired() {
                return Err(McpError::ClientNotFound(slot.id().to_string()));
            }
            self.manager.connect_locked(slot).await
        }
        .instrument(info_span!("connect", client_id = %slot.id()))
        .await
    }

    pub async fn disconnect_client(&self, id: &str) -> McpResult<()> {
        let slot = self.registry.require(id)?;
        async {
            let _guard = slot.lock().await;
            if slot.is_retired() {
                return Err(McpError::ClientNotFound(id.to_string()));
            }
            self.manager.disconnect_locked(&slot).await;
            Ok(())
        }
        .instrument(info_span!("disconnect", client_id = %id))
        .await
    }

    /// Lifecycle events of every client
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.registry.subscribe()
    }

    /// Run one health sweep now, outside the periodic schedule
    pub async fn run_health_sweep(&self) -> SweepReport {
        self.supervisor.sweep().await
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether a live session is registered for `id`
    pub fn has_session(&self, id: &str) -> bool {
        self.manager.has_session(id)
    }

    /// Whether an owned subprocess is registered for `id`
    pub fn has_process(&self, id: &str) -> bool {
        self.manager.has_process(id)
    }
}
