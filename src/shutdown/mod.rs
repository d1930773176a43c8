//! Graceful shutdown handling for the feed daemon.
//!
//! On a termination signal the daemon:
//! 1. Signals background tasks (status server) to stop
//! 2. Closes every channel's transport, cancelling pending reconnects
//! 3. Gives the transports a short grace period to send their close frames

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;

use crate::feed::{ChannelRegistry, ConnectionState};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time given to transports to finish their close handshake (default: 500ms)
    pub close_grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_grace_period: Duration::from_millis(500),
        }
    }
}

/// Handles graceful shutdown of the feed daemon
pub struct GracefulShutdown {
    registry: Arc<ChannelRegistry>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(registry: Arc<ChannelRegistry>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(registry, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ChannelRegistry>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = std::time::Instant::now();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 2: Closing channels");
        let live = self
            .registry
            .stats()
            .iter()
            .filter(|s| matches!(s.state, ConnectionState::Connecting | ConnectionState::Open))
            .count();
        self.registry.shutdown_all();

        if live > 0 {
            tracing::info!("Phase 3: Waiting for close handshakes");
            tokio::time::sleep(self.config.close_grace_period).await;
        }

        let result = ShutdownResult {
            channels_closed: live,
            duration: start.elapsed(),
        };

        tracing::info!(
            channels_closed = result.channels_closed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Channels whose transport was connecting or open
    pub channels_closed: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

/// Resolve on Ctrl+C or SIGTERM
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
