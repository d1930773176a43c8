//! Reconnection policy for live feed channels
//!
//! A channel that loses its transport while consumers are still attached
//! retries a bounded number of times. The delay between attempts is fixed
//! by default; an exponential strategy with jitter is available for
//! deployments that prefer to back off from a struggling server.

mod policy;

pub use policy::{ReconnectPolicy, ReconnectStrategy};
