mod settings;

pub use settings::{FeedConfig, LogConfig, ReconnectConfig, Settings, StatusConfig};
