//! Configured clients and their runtime records

use crate::core::client::{ClientConfig, ClientEvent, ClientRecord, ClientStatus};
use crate::core::protocol::Tool;
use crate::utils::errors::{McpError, McpResult};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};

/// Capacity of the lifecycle event channel
const EVENT_CAPACITY: usize = 256;

/// One registered client: its record plus the lock serializing
/// connect, disconnect, removal and health probes for it
pub struct ClientSlot {
    id: String,
    record: RwLock<ClientRecord>,
    op_lock: Mutex<()>,
    retired: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientSlot {
    fn new(id: String, config: ClientConfig, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            record: RwLock::new(ClientRecord::new(id.clone(), config)),
            id,
            op_lock: Mutex::new(()),
            retired: AtomicBool::new(false),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot(&self) -> ClientRecord {
        self.record.read().clone()
    }

    pub fn status(&self) -> ClientStatus {
        self.record.read().status
    }

    pub fn config(&self) -> ClientConfig {
        self.record.read().config.clone()
    }

    pub fn tool_count(&self) -> usize {
        self.record.read().tools.len()
    }

    /// Acquire the per-client operation lock
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.op_lock.lock().await
    }

    /// Whether the slot was removed from the registry
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, record: &mut ClientRecord, status: ClientStatus) -> bool {
        if record.status == status {
            return false;
        }
        record.status = status;
        true
    }

    pub(crate) fn mark_connecting(&self) {
        let changed = {
            let mut record = self.record.write();
            self.transition(&mut record, ClientStatus::Connecting)
        };
        if changed {
            self.emit(ClientEvent::StatusChanged {
                id: self.id.clone(),
                status: ClientStatus::Connecting,
            });
        }
    }

    pub(crate) fn mark_connected(&self, tools: Vec<Tool>) {
        let count = tools.len();
        let changed = {
            let mut record = self.record.write();
            record.tools = tools;
            record.last_error = None;
            record.last_seen = Some(Utc::now());
            self.transition(&mut record, ClientStatus::Connected)
        };
        if changed {
            self.emit(ClientEvent::StatusChanged {
                id: self.id.clone(),
                status: ClientStatus::Connected,
            });
        }
        self.emit(ClientEvent::ToolsUpdated {
            id: self.id.clone(),
            count,
        });
    }

    pub(crate) fn mark_error(&self, message: impl Into<String>) {
        let changed = {
            let mut record = self.record.write();
            record.tools.clear();
            record.last_error = Some(message.into());
            self.transition(&mut record, ClientStatus::Error)
        };
        if changed {
            self.emit(ClientEvent::StatusChanged {
                id: self.id.clone(),
                status: ClientStatus::Error,
            });
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        let changed = {
            let mut record = self.record.write();
            record.tools.clear();
            self.transition(&mut record, ClientStatus::Disconnected)
        };
        if changed {
            self.emit(ClientEvent::StatusChanged {
                id: self.id.clone(),
                status: ClientStatus::Disconnected,
            });
        }
    }

    /// Replace the tool cache of a connected client
    pub(crate) fn replace_tools(&self, tools: Vec<Tool>) {
        let count = tools.len();
        {
            let mut record = self.record.write();
            record.tools = tools;
            record.last_seen = Some(Utc::now());
        }
        self.emit(ClientEvent::ToolsUpdated {
            id: self.id.clone(),
            count,
        });
    }

    pub(crate) fn touch(&self) {
        self.record.write().last_seen = Some(Utc::now());
    }

    /// Record a failure without changing status
    pub(crate) fn record_error(&self, message: impl Into<String>) {
        self.record.write().last_error = Some(message.into());
    }
}

impl std::fmt::Debug for ClientSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSlot")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("retired", &self.is_retired())
            .finish()
    }
}

/// Concurrent map of client id to slot; no global lock
pub struct ClientRegistry {
    slots: DashMap<String, Arc<ClientSlot>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slots: DashMap::new(),
            events,
        }
    }

    /// Register a new `Disconnected` record
    pub fn insert(&self, id: &str, config: ClientConfig) -> McpResult<Arc<ClientSlot>> {
        let slot = match self.slots.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(McpError::DuplicateId(id.to_string())),
            Entry::Vacant(entry) => {
                let slot = Arc::new(ClientSlot::new(id.to_string(), config, self.events.clone()));
                entry.insert(slot.clone());
                slot
            }
        };
        let _ = self.events.send(ClientEvent::Added { id: id.to_string() });
        Ok(slot)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ClientSlot>> {
        self.slots.get(id).map(|entry| entry.value().clone())
    }

    pub fn require(&self, id: &str) -> McpResult<Arc<ClientSlot>> {
        self.get(id)
            .ok_or_else(|| McpError::ClientNotFound(id.to_string()))
    }

    /// Remove `slot` only if it is still the registered one for its id
    pub fn remove_if_same(&self, slot: &Arc<ClientSlot>) -> bool {
        let removed = self
            .slots
            .remove_if(slot.id(), |_, current| Arc::ptr_eq(current, slot))
            .is_some();
        if removed {
            let _ = self.events.send(ClientEvent::Removed {
                id: slot.id().to_string(),
            });
        }
        removed
    }

    /// All slots ordered by id
    pub fn slots(&self) -> Vec<Arc<ClientSlot>> {
        let mut slots: Vec<_> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        slots.sort_by(|a, b| a.id().cmp(b.id()));
        slots
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::TransportKind;

    fn config() -> ClientConfig {
        ClientConfig::new("Filesystem", TransportKind::PackageLaunch).param("package", "pkg")
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let registry = ClientRegistry::new();
        registry.insert("fs", config()).unwrap();
        assert!(matches!(
            registry.insert("fs", config()),
            Err(McpError::DuplicateId(id)) if id == "fs"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_slots_sorted_by_id() {
        let registry = ClientRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.insert(id, config()).unwrap();
        }
        let ids: Vec<_> = registry.slots().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_remove_if_same_ignores_replaced_slot() {
        let registry = ClientRegistry::new();
        let old = registry.insert("fs", config()).unwrap();
        assert!(registry.remove_if_same(&old));

        let new = registry.insert("fs", config()).unwrap();
        assert!(!registry.remove_if_same(&old));
        assert!(registry.contains("fs"));
        assert!(registry.remove_if_same(&new));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_status_events_only_on_change() {
        let registry = ClientRegistry::new();
        let mut events = registry.subscribe();
        let slot = registry.insert("fs", config()).unwrap();

        slot.mark_connecting();
        slot.mark_connecting();
        slot.mark_connected(vec![Tool::new("list_dir")]);

        assert_eq!(events.try_recv().unwrap(), ClientEvent::Added { id: "fs".into() });
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::StatusChanged { id: "fs".into(), status: ClientStatus::Connecting }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::StatusChanged { id: "fs".into(), status: ClientStatus::Connected }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::ToolsUpdated { id: "fs".into(), count: 1 }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_error_clears_tools() {
        let registry = ClientRegistry::new();
        let slot = registry.insert("fs", config()).unwrap();
        slot.mark_connected(vec![Tool::new("a"), Tool::new("b")]);
        assert_eq!(slot.tool_count(), 2);
        assert!(slot.snapshot().last_seen.is_some());

        slot.mark_error("boom");
        let record = slot.snapshot();
        assert_eq!(record.status, ClientStatus::Error);
        assert!(record.tools.is_empty());
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }
}
