use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::feed::ChannelRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<ChannelRegistry>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, registry: Arc<ChannelRegistry>) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            start_time: Instant::now(),
        }
    }
}
