//! Graceful Shutdown Handling
//!
//! Wires SIGTERM and SIGINT into the server's shutdown broadcast and waits
//! for in-flight connections to drain before the process exits.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::server::Server;
use crate::Result;

/// Shutdown coordinator that manages the graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender shared with the server's connection tasks
    shutdown_tx: broadcast::Sender<()>,
    /// How long to wait for active connections before giving up
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(shutdown_tx: broadcast::Sender<()>, drain_timeout: Duration) -> Self {
        Self {
            shutdown_tx,
            drain_timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
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
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal: {}", e);
        }

        Ok(())
    }

    /// Wait for the server's in-flight connections to finish, up to the
    /// drain timeout.
    pub async fn wait_for_drain(&self, server: &Server) {
        let start_time = Instant::now();

        let mut last_count = server.active_connections();
        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            last_count, self.drain_timeout
        );

        while last_count > 0 && start_time.elapsed() < self.drain_timeout {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let current_count = server.active_connections();
            if current_count != last_count {
                debug!("Active connections: {} -> {}", last_count, current_count);
                last_count = current_count;
            }
        }

        let final_count = server.active_connections();
        let elapsed = start_time.elapsed();

        if final_count == 0 {
            info!("All connections closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Drain timeout reached after {:?} with {} connections still active",
                elapsed, final_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_signal_broadcast() {
        let (shutdown_tx, _) = broadcast::channel(1);
        let coordinator = ShutdownCoordinator::new(shutdown_tx, Duration::from_secs(5));
        let mut receiver = coordinator.subscribe();

        coordinator.shutdown_tx.send(()).unwrap();

        assert!(receiver.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_drain_returns_immediately_when_idle() {
        let server = Server::new(Arc::new(Config::default())).unwrap();
        let coordinator = ShutdownCoordinator::new(server.shutdown_handle(), Duration::from_secs(5));

        let started = Instant::now();
        coordinator.wait_for_drain(&server).await;
        assert!(started.elapsed() < Duration::from_millis(400));
    }
}
