use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Base address the channel paths are appended to (ws:// or wss://)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Channels the daemon attaches to at startup
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    /// Transport establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Retries after a failed or dropped connection before the channel pauses
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before each retry (initial delay for "exponential")
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// "fixed" or "exponential"
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_status_host")]
    pub host: String,
    #[serde(default = "default_status_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_base_url() -> String {
    "ws://localhost:8888".to_string()
}

fn default_channels() -> Vec<String> {
    vec![
        "/ws/market".to_string(),
        "/ws/trading".to_string(),
        "/ws/chats".to_string(),
    ]
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    3000
}

fn default_strategy() -> String {
    "fixed".to_string()
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_status_enabled() -> bool {
    true
}

fn default_status_host() -> String {
    "127.0.0.1".to_string()
}

fn default_status_port() -> u16 {
    8090
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // ARENA_FEED__BASE_URL, ARENA_RECONNECT__MAX_ATTEMPTS, ARENA_STATUS__PORT, ...
            .add_source(
                Environment::with_prefix("ARENA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("feed.channels"),
            )
            // Base address provided by the deployment environment
            .set_override_option("feed.base_url", env::var("WS_BASE_URL").ok())?;

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("feed.base_url", default_base_url())?
            .set_default("feed.connect_timeout_ms", default_connect_timeout_ms() as i64)?
            .set_default("reconnect.max_attempts", i64::from(default_max_attempts()))?
            .set_default("reconnect.delay_ms", default_delay_ms() as i64)?
            .set_default("reconnect.strategy", default_strategy())?
            .set_default("status.enabled", default_status_enabled())?
            .set_default("status.host", default_status_host())?
            .set_default("status.port", i64::from(default_status_port()))
    }

    /// Reject values the feed cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.feed.base_url.as_str();
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(ConfigError::Message(format!(
                "feed.base_url must start with ws:// or wss://, got '{}'",
                base
            )));
        }

        match self.reconnect.strategy.as_str() {
            "fixed" | "exponential" => {}
            other => {
                return Err(ConfigError::Message(format!(
                    "reconnect.strategy must be 'fixed' or 'exponential', got '{}'",
                    other
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(ConfigError::Message(
                "reconnect.jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }

        match self.log.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(ConfigError::Message(format!(
                "log.format must be 'pretty' or 'json', got '{}'",
                other
            ))),
        }
    }

    pub fn status_addr(&self) -> String {
        format!("{}:{}", self.status.host, self.status.port)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            channels: default_channels(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            strategy: default_strategy(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}
