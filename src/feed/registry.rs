//! One connection manager per channel path

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::{FeedConfig, ReconnectConfig};
use crate::error::{FeedError, Result};
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Transport, WebSocketTransport};

use super::manager::ConnectionManager;
use super::types::ChannelStats;

/// Market quotes
pub const MARKET: &str = "/ws/market";
/// Orders, portfolios and quote snapshots
pub const TRADING: &str = "/ws/trading";
/// Model reasoning and chat messages
pub const CHATS: &str = "/ws/chats";
/// Holding curves
pub const PERFORMANCE: &str = "/ws/performance";

/// Hands out the same [`ConnectionManager`] for a channel path to every caller
pub struct ChannelRegistry {
    base_url: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    channels: DashMap<String, ConnectionManager>,
}

impl ChannelRegistry {
    pub fn new(
        base_url: impl Into<String>,
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            transport,
            channels: DashMap::new(),
        }
    }

    /// Registry backed by WebSocket connections, configured from settings
    pub fn from_settings(feed: &FeedConfig, reconnect: &ReconnectConfig) -> Result<Self> {
        let transport = WebSocketTransport::new(Duration::from_millis(feed.connect_timeout_ms));
        Self::with_transport(feed, reconnect, Arc::new(transport))
    }

    pub fn with_transport(
        feed: &FeedConfig,
        reconnect: &ReconnectConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let base = feed.base_url.as_str();
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(FeedError::Validation(format!(
                "base url must start with ws:// or wss://, got '{}'",
                base
            )));
        }

        let registry = Self::new(base, ReconnectPolicy::from(reconnect), transport);
        tracing::info!(
            base_url = %registry.base_url,
            max_attempts = registry.policy.max_attempts,
            "Channel registry created"
        );
        Ok(registry)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Manager for `path`, created on first use
    pub fn channel(&self, path: &str) -> ConnectionManager {
        let path = normalize_path(path);
        if let Some(existing) = self.channels.get(&path) {
            return existing.clone();
        }

        self.channels
            .entry(path.clone())
            .or_insert_with(|| {
                let url = format!("{}{}", self.base_url, path);
                tracing::debug!(channel = %path, url = %url, "Creating channel manager");
                ConnectionManager::new(path.clone(), url, self.policy.clone(), self.transport.clone())
            })
            .clone()
    }

    /// Manager for `path` if it was created before
    pub fn get(&self, path: &str) -> Option<ConnectionManager> {
        self.channels
            .get(&normalize_path(path))
            .map(|m| m.value().clone())
    }

    /// Paths of all created channels, sorted
    pub fn channels(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        let mut stats: Vec<ChannelStats> = self
            .channels
            .iter()
            .map(|e| e.value().stats())
            .collect();
        stats.sort_by(|a, b| a.channel.cmp(&b.channel));
        stats
    }

    /// Close every channel's transport
    pub fn shutdown_all(&self) {
        let managers: Vec<ConnectionManager> =
            self.channels.iter().map(|e| e.value().clone()).collect();
        for manager in managers {
            manager.shutdown();
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Payload;
    use crate::transport::MemoryTransport;

    fn registry(transport: &MemoryTransport) -> ChannelRegistry {
        ChannelRegistry::new(
            "ws://localhost:8888/",
            ReconnectPolicy::default(),
            Arc::new(transport.clone()),
        )
    }

    #[test]
    fn test_same_manager_per_path() {
        let transport = MemoryTransport::new();
        let registry = registry(&transport);

        let a = registry.channel(TRADING);
        let b = registry.channel("ws/trading");

        a.on_message(Arc::new(|_: &Payload| {}));
        assert_eq!(b.stats().message_handlers, 1);
        assert_eq!(a.url(), "ws://localhost:8888/ws/trading");
        assert_eq!(b.policy(), &ReconnectPolicy::default());
        assert_eq!(registry.channels(), vec![TRADING.to_string()]);
    }

    #[test]
    fn test_get_does_not_create() {
        let transport = MemoryTransport::new();
        let registry = registry(&transport);

        assert!(registry.get(CHATS).is_none());
        registry.channel(CHATS);
        assert!(registry.get(CHATS).is_some());
    }

    #[tokio::test]
    async fn test_shutdown_all_closes_transports() {
        let transport = MemoryTransport::new();
        let registry = registry(&transport);

        registry.channel(MARKET).attach();
        registry.channel(TRADING).attach();
        registry.channel(TRADING).attach();
        assert_eq!(transport.open_count(), 2);

        registry.shutdown_all();

        assert!(transport
            .connections()
            .iter()
            .all(|c| c.is_closed_locally()));
        assert!(registry.stats().iter().all(|s| s.consumers == 0));
    }

    #[test]
    fn test_rejects_http_base_url() {
        let feed = FeedConfig {
            base_url: "http://localhost:8888".to_string(),
            ..Default::default()
        };
        let result = ChannelRegistry::with_transport(
            &feed,
            &ReconnectConfig::default(),
            Arc::new(MemoryTransport::new()),
        );
        assert!(matches!(result, Err(FeedError::Validation(_))));
    }
}
