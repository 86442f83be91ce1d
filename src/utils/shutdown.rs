//! Graceful shutdown handling
//!
//! Handles SIGTERM, SIGINT signals for the long-running `serve` command.

use tokio::signal;
use tracing::{info, warn};

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        info!("Shutdown signal sent");
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for SIGTERM, SIGINT or a manual trigger, whichever comes first
    pub async fn wait_for_shutdown_signal(&self) {
        let mut manual = self.subscribe();

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, starting graceful shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = manual.recv() => {
                info!("Shutdown requested");
                return;
            }
        }

        self.shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.shutdown();

        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_manual_trigger_ends_wait() {
        let coordinator = std::sync::Arc::new(ShutdownCoordinator::new());
        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_for_shutdown_signal().await })
        };

        // Let the waiter subscribe before triggering.
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.shutdown();

        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
    }
}
