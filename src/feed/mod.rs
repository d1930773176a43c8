//! Shared live feed channels
//!
//! Consumers attach to a channel to keep its transport alive and register
//! handlers to receive frames and lifecycle events. All consumers of a
//! channel share one connection, obtained through [`ChannelRegistry`].

mod handlers;
mod manager;
pub mod registry;
mod types;

pub use handlers::HandlerRegistry;
pub use manager::{Attachment, ConnectionManager};
pub use registry::ChannelRegistry;
pub use types::{ChannelStats, ConnectionState, LifecycleHandler, MessageHandler, Payload};
