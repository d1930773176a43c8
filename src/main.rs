use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use arena_live_feed::config::Settings;
use arena_live_feed::feed::{ChannelRegistry, ConnectionManager, Payload};
use arena_live_feed::server::{create_app, AppState};
use arena_live_feed::shutdown::{wait_for_signal, GracefulShutdown};
use arena_live_feed::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.log);
    tracing::info!(base_url = %settings.feed.base_url, "Configuration loaded");

    let registry = Arc::new(ChannelRegistry::from_settings(
        &settings.feed,
        &settings.reconnect,
    )?);

    // Attach to every configured channel for the lifetime of the process
    for path in &settings.feed.channels {
        let channel = registry.channel(path);
        log_channel_events(&channel);
        channel.attach();
    }
    tracing::info!(channels = settings.feed.channels.len(), "Channels attached");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Start status server in background
    let server_handle = if settings.status.enabled {
        let addr = settings.status_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Status server listening on {}", addr);

        let app = create_app(AppState::new(settings.clone(), registry.clone()));
        let mut shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Status server failed");
            }
        }))
    } else {
        None
    };

    wait_for_signal().await;

    GracefulShutdown::new(registry, shutdown_tx)
        .execute("signal received")
        .await;

    if let Some(handle) = server_handle {
        tracing::info!("Waiting for status server to finish...");
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_channel_events(channel: &ConnectionManager) {
    let name = channel.channel().to_string();
    channel.on_message(Arc::new(move |payload: &Payload| {
        tracing::debug!(
            channel = %name,
            kind = payload.kind().unwrap_or("untyped"),
            "Frame received"
        );
    }));

    let name = channel.channel().to_string();
    channel.on_open(Arc::new(move || {
        tracing::debug!(channel = %name, "Channel open");
    }));

    let name = channel.channel().to_string();
    channel.on_close(Arc::new(move || {
        tracing::debug!(channel = %name, "Channel closed");
    }));
}
