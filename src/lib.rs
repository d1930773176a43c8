// Core
pub mod feed;
pub mod reconnect;
pub mod transport;

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Status surface
pub mod api;
pub mod server;

// Supporting modules
pub mod shutdown;
