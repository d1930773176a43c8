//! In-process transport
//!
//! Every `open` is recorded as a [`MemoryConnection`] that the caller drives
//! by hand: establish it, push frames, fail it, and inspect what the channel
//! sent. Used by the test suites and by embedders that bridge an existing
//! event source into a channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Transport, TransportError, TransportEvent, TransportLink, TransportSink};

#[derive(Debug, Default)]
struct ConnectionState {
    sent: Vec<String>,
    closed_locally: bool,
    finished: bool,
}

/// One recorded connection attempt
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    url: String,
    sink: TransportSink,
    state: Arc<Mutex<ConnectionState>>,
}

impl MemoryConnection {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Report the connection as established
    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Deliver an inbound text frame
    pub fn message(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Report an error followed by the end of the connection
    pub fn fail(&self, error: impl Into<String>) {
        self.emit(TransportEvent::Error(error.into()));
        self.finish(None);
    }

    /// End the connection from the remote side
    pub fn close_remote(&self, reason: Option<&str>) {
        self.finish(reason.map(str::to_string));
    }

    /// Frames written through the link, oldest first
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Whether the owning channel closed this connection
    pub fn is_closed_locally(&self) -> bool {
        self.state().closed_locally
    }

    fn finish(&self, reason: Option<String>) {
        {
            let mut state = self.state();
            if state.finished || state.closed_locally {
                return;
            }
            state.finished = true;
        }
        self.sink.emit(TransportEvent::Closed { reason });
    }

    fn emit(&self, event: TransportEvent) {
        {
            let state = self.state();
            if state.finished || state.closed_locally {
                return;
            }
        }
        self.sink.emit(event);
    }
}

struct MemoryLink {
    state: Arc<Mutex<ConnectionState>>,
}

impl TransportLink for MemoryLink {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed_locally || state.finished {
            return Err(TransportError::Closed);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed_locally = true;
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Transport whose connections are driven by the caller
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    connections: Arc<Mutex<Vec<MemoryConnection>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn connections_guard(&self) -> MutexGuard<'_, Vec<MemoryConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of `open` calls so far
    pub fn open_count(&self) -> usize {
        self.connections_guard().len()
    }

    pub fn connection(&self, index: usize) -> Option<MemoryConnection> {
        self.connections_guard().get(index).cloned()
    }

    /// Most recent connection attempt
    pub fn last(&self) -> Option<MemoryConnection> {
        self.connections_guard().last().cloned()
    }

    pub fn connections(&self) -> Vec<MemoryConnection> {
        self.connections_guard().clone()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportLink> {
        let state = Arc::new(Mutex::new(ConnectionState::default()));
        self.connections_guard().push(MemoryConnection {
            url: url.to_string(),
            sink,
            state: state.clone(),
        });
        Box::new(MemoryLink { state })
    }
}
