//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT and lets open tunnels drain before the
//! process exits.

use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx, timeout }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast shutdown to every subscriber
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }
    }

    /// Wait for SIGTERM or SIGINT, then broadcast shutdown
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Stop accepting and give open tunnels up to the shutdown timeout to finish
    pub async fn shutdown_connection_manager(&self, connection_manager: &ConnectionManager) -> Result<()> {
        let start_time = Instant::now();
        connection_manager.initiate_shutdown();

        let mut last_count = connection_manager.get_active_connections();
        info!(
            "Waiting for {} active tunnels to close (timeout: {:?})",
            last_count, self.timeout
        );

        while last_count > 0 && start_time.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;

            let current_count = connection_manager.get_active_connections();
            if current_count != last_count {
                debug!("Active tunnels: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let elapsed = start_time.elapsed();
        if last_count == 0 {
            info!("All tunnels closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} tunnels still open",
                elapsed, last_count
            );
        }

        Ok(())
    }
}

/// Spawned task that is aborted when shutdown is broadcast
pub struct ShutdownAwareTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ShutdownAwareTask {
    pub fn spawn<Fut>(shutdown_coordinator: &ShutdownCoordinator, task_name: &str, task: Fut) -> Self
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let task_name = task_name.to_string();
        let handle = tokio::spawn(async move {
            debug!("Starting shutdown-aware task: {}", task_name);
            task.await;
            debug!("Shutdown-aware task completed: {}", task_name);
        });

        Self {
            handle,
            shutdown_rx: shutdown_coordinator.subscribe(),
        }
    }

    /// Wait for the task to complete, aborting it on shutdown
    pub async fn wait_for_completion_or_shutdown(mut self) -> Result<()> {
        tokio::select! {
            result = &mut self.handle => {
                match result {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_cancelled() => Ok(()),
                    Err(e) => {
                        error!("Task failed: {}", e);
                        Err(anyhow::anyhow!("Task failed: {}", e))
                    }
                }
            }
            _ = self.shutdown_rx.recv() => {
                debug!("Received shutdown signal, cancelling task");
                self.handle.abort();
                Ok(())
            }
        }
    }
}
