//! Channel state, payload and statistics types

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a channel's transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected
    Idle,
    Connecting,
    Open,
    /// Deliberate teardown in progress
    Closing,
    /// No transport held; waiting for a retry, paused, or detached
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    /// Numeric form exported as a gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound frame, forwarded to handlers as received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Payload)
    }

    /// The frame's `type` discriminant, if it has one
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload(value)
    }
}

/// Called once per inbound frame
pub type MessageHandler = Arc<dyn Fn(&Payload) + Send + Sync>;

/// Called when the transport opens or closes
pub type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Point-in-time view of a channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    pub url: String,
    pub state: ConnectionState,
    pub consumers: usize,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// Retries used up while consumers remain attached
    pub exhausted: bool,
    pub total_opens: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub sends_dropped: u64,
    pub message_handlers: usize,
    pub open_handlers: usize,
    pub close_handlers: usize,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub connection_id: Option<Uuid>,
}
