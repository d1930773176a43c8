use axum::{routing::get, Router};

use crate::server::AppState;

use super::channels::{get_channel, list_channels};
use super::health::health;
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/channels", get(list_channels))
        .route("/channel", get(get_channel))
}
