//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::feed::ConnectionState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" when every attached channel is open, otherwise "degraded"
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub base_url: String,
    pub channels: ChannelHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ChannelHealthResponse {
    pub total: usize,
    pub attached: usize,
    pub open: usize,
    pub exhausted: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.registry.stats();

    let attached = stats.iter().filter(|s| s.consumers > 0).count();
    let open = stats
        .iter()
        .filter(|s| s.consumers > 0 && s.state == ConnectionState::Open)
        .count();
    let exhausted = stats.iter().filter(|s| s.exhausted).count();

    let status = if open == attached { "ok" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        base_url: state.registry.base_url().to_string(),
        channels: ChannelHealthResponse {
            total: stats.len(),
            attached,
            open,
            exhausted,
        },
    })
}
