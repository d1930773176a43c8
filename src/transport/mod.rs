//! Transport boundary for live feed channels
//!
//! A [`Transport`] opens bidirectional text connections without blocking the
//! caller. Progress is reported through a [`TransportSink`], one event at a
//! time and in the order the connection produced them:
//!
//! - `Opened` once the connection is established
//! - `Message` for every inbound text frame
//! - `Error` for failures (always followed by `Closed`)
//! - `Closed` exactly once when the connection ends on its own
//!
//! A link closed through [`TransportLink::close`] (or dropped) reports
//! nothing further.
//!
//! # Implementations
//!
//! - [`WebSocketTransport`]: WebSocket client over `tokio-tungstenite`
//! - [`MemoryTransport`]: in-process transport driven by the caller

mod memory;
mod websocket;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use memory::{MemoryConnection, MemoryTransport};
pub use websocket::WebSocketTransport;

/// Event reported by an open or opening connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed { reason: Option<String> },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,
}

/// Receives the events of a single connection attempt
#[derive(Clone)]
pub struct TransportSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl TransportSink {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Deliver an event; returns once every listener has run
    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSink").finish_non_exhaustive()
    }
}

/// Factory for connections to a URL
pub trait Transport: Send + Sync {
    /// Start opening a connection; must not block
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportLink>;
}

/// Outbound half of a connection, owned by the channel manager
pub trait TransportLink: Send {
    /// Queue a text frame for transmission
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection deliberately
    fn close(&mut self);
}
