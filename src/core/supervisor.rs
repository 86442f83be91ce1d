//! Background health checks with automatic reconnection

use crate::core::client::ClientStatus;
use crate::core::lifecycle::ConnectionManager;
use crate::core::registry::{ClientRegistry, ClientSlot};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome counts of one health sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub probed: usize,
    pub healthy: usize,
    pub failed: usize,
    pub reconnected: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Skipped,
    Healthy,
    Failed,
    Reconnected,
}

/// Last probe time per client, so each client keeps its own cadence.
///
/// A client counts as due up to `slack` early, which keeps an interval
/// equal to the sweep interval from slipping a whole sweep on timer jitter.
#[derive(Debug)]
pub struct ProbeSchedule {
    slack: Duration,
    last_probe: HashMap<String, Instant>,
}

impl ProbeSchedule {
    pub fn new(slack: Duration) -> Self {
        Self {
            slack,
            last_probe: HashMap::new(),
        }
    }

    pub fn is_due(&self, id: &str, interval: Duration, now: Instant) -> bool {
        match self.last_probe.get(id) {
            Some(last) => now.saturating_duration_since(*last) + self.slack >= interval,
            None => true,
        }
    }

    pub fn mark(&mut self, id: &str, now: Instant) {
        self.last_probe.insert(id.to_string(), now);
    }

    /// Drop entries of clients that no longer exist
    pub fn retain<F: Fn(&str) -> bool>(&mut self, keep: F) {
        self.last_probe.retain(|id, _| keep(id));
    }
}

/// Probes connected clients and re-drives failed ones
pub struct HealthSupervisor {
    registry: Arc<ClientRegistry>,
    manager: Arc<ConnectionManager>,
    interval: Duration,
    schedule: Mutex<ProbeSchedule>,
    sweep_lock: tokio::sync::Mutex<()>,
}

impl HealthSupervisor {
    pub fn new(
        registry: Arc<ClientRegistry>,
        manager: Arc<ConnectionManager>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            manager,
            interval,
            schedule: Mutex::new(ProbeSchedule::new(interval / 2)),
            sweep_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run the periodic loop until cancelled; the first sweep is immediate
    pub fn spawn(self: Arc<Self>) -> SupervisorHandle {
        let token = CancellationToken::new();
        let task = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!("Health supervisor started (every {:?})", self.interval);

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            // Not raced against cancellation: an in-flight sweep finishes.
                            let report = self.sweep().await;
                            if report.probed > 0 {
                                debug!(?report, "Health sweep finished");
                            }
                        }
                    }
                }

                info!("Health supervisor stopped");
            })
        };
        SupervisorHandle { token, task }
    }

    /// One pass over every client; never overlaps another sweep
    pub async fn sweep(&self) -> SweepReport {
        let _sweep = self.sweep_lock.lock().await;
        let now = Instant::now();

        let slots = self.registry.slots();
        let due: Vec<Arc<ClientSlot>> = {
            let mut schedule = self.schedule.lock();
            schedule.retain(|id| self.registry.contains(id));
            slots
                .into_iter()
                .filter(|slot| {
                    let config = slot.config();
                    match slot.status() {
                        ClientStatus::Connected => {
                            let interval =
                                Duration::from_secs(config.health_check_interval_seconds.max(1));
                            if schedule.is_due(slot.id(), interval, now) {
                                schedule.mark(slot.id(), now);
                                true
                            } else {
                                false
                            }
                        }
                        ClientStatus::Error => config.auto_connect,
                        _ => false,
                    }
                })
                .collect()
        };

        let outcomes = join_all(due.iter().map(|slot| self.probe(slot))).await;

        let mut report = SweepReport::default();
        for outcome in outcomes {
            match outcome {
                ProbeOutcome::Skipped => continue,
                ProbeOutcome::Healthy => report.healthy += 1,
                ProbeOutcome::Failed => report.failed += 1,
                ProbeOutcome::Reconnected => report.reconnected += 1,
            }
            report.probed += 1;
        }
        report
    }

    async fn probe(&self, slot: &ClientSlot) -> ProbeOutcome {
        let _guard = slot.lock().await;
        if slot.is_retired() {
            return ProbeOutcome::Skipped;
        }
        let id = slot.id();
        let auto_connect = slot.config().auto_connect;

        match slot.status() {
            ClientStatus::Connected => {}
            ClientStatus::Error if auto_connect => {
                debug!("[{}] Retrying connection", id);
                return match self.manager.connect_locked(slot).await {
                    Ok(()) => {
                        info!("[{}] Reconnected", id);
                        ProbeOutcome::Reconnected
                    }
                    Err(e) => {
                        warn!("[{}] Reconnect attempt failed: {}", id, e);
                        ProbeOutcome::Failed
                    }
                };
            }
            // Changed while waiting for the lock.
            _ => return ProbeOutcome::Skipped,
        }

        let reason = match self.manager.session(id) {
            None => Some("session missing".to_string()),
            Some(session) if !session.is_alive() => Some("transport closed".to_string()),
            Some(_) => match self.manager.refresh_tools(slot).await {
                Ok(_) => None,
                Err(e) => Some(e.to_string()),
            },
        };

        let Some(reason) = reason else {
            return ProbeOutcome::Healthy;
        };

        warn!("[{}] Health check failed: {}", id, reason);
        self.manager
            .fail_locked(slot, &format!("health check failed: {}", reason))
            .await;

        if !auto_connect {
            return ProbeOutcome::Failed;
        }

        self.manager.disconnect_locked(slot).await;
        match self.manager.connect_locked(slot).await {
            Ok(()) => {
                info!("[{}] Reconnected after failed health check", id);
                ProbeOutcome::Reconnected
            }
            Err(e) => {
                warn!("[{}] Reconnect failed: {}", id, e);
                ProbeOutcome::Failed
            }
        }
    }
}

/// Handle to a running supervisor task
pub struct SupervisorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Cancel and wait for the current sweep to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Health supervisor task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
