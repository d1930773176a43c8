//! Status API - read-only HTTP endpoints describing the live channels.

mod channels;
mod health;
mod metrics;
mod routes;

pub use channels::{get_channel, list_channels, ChannelQuery};
pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
