//! Channel status endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::feed::ChannelStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub channels: Vec<ChannelStats>,
    pub total_channels: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    pub path: String,
}

/// GET /channels - Stats for every channel created in this process
pub async fn list_channels(State(state): State<AppState>) -> Json<ChannelListResponse> {
    let channels = state.registry.stats();
    let total = channels.len();

    Json(ChannelListResponse {
        channels,
        total_channels: total,
    })
}

/// GET /channel?path=/ws/trading - Stats for one channel
pub async fn get_channel(
    State(state): State<AppState>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<ChannelStats>, FeedError> {
    state
        .registry
        .get(&query.path)
        .map(|manager| Json(manager.stats()))
        .ok_or_else(|| FeedError::NotFound(format!("Channel '{}' not found", query.path)))
}
