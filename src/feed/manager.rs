//! Shared, reference-counted channel connection
//!
//! One [`ConnectionManager`] owns at most one transport for its channel. The
//! transport is opened when the first consumer attaches, re-opened after a
//! failure while consumers remain (up to the policy's attempt limit), and
//! closed when the last consumer detaches.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::metrics::FeedMetrics;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{Transport, TransportEvent, TransportLink, TransportSink};

use super::handlers::HandlerRegistry;
use super::types::{ChannelStats, ConnectionState, LifecycleHandler, MessageHandler, Payload};

/// Handle to a channel's shared connection. Clones refer to the same channel.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    channel: String,
    url: String,
    policy: ReconnectPolicy,
    transport: Arc<dyn Transport>,
    inner: Mutex<Inner>,
    message_handlers: HandlerRegistry<dyn Fn(&Payload) + Send + Sync>,
    open_handlers: HandlerRegistry<dyn Fn() + Send + Sync>,
    close_handlers: HandlerRegistry<dyn Fn() + Send + Sync>,
}

struct Inner {
    state: ConnectionState,
    consumers: usize,
    /// Retries made since the last successful open
    attempts: u32,
    exhausted: bool,
    /// Identifies the current transport attempt; events and timers carrying
    /// an older value are ignored
    generation: u64,
    link: Option<Box<dyn TransportLink>>,
    retry: Option<JoinHandle<()>>,
    connection_id: Option<Uuid>,
    total_opens: u64,
    frames_received: u64,
    frames_dropped: u64,
    sends_dropped: u64,
    last_opened_at: Option<DateTime<Utc>>,
}

/// Resources released by a teardown, handled after the lock is dropped
struct Teardown {
    generation: u64,
    was_open: bool,
    link: Option<Box<dyn TransportLink>>,
    retry: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    pub fn new(
        channel: impl Into<String>,
        url: impl Into<String>,
        policy: ReconnectPolicy,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel: channel.into(),
                url: url.into(),
                policy,
                transport,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Idle,
                    consumers: 0,
                    attempts: 0,
                    exhausted: false,
                    generation: 0,
                    link: None,
                    retry: None,
                    connection_id: None,
                    total_opens: 0,
                    frames_received: 0,
                    frames_dropped: 0,
                    sends_dropped: 0,
                    last_opened_at: None,
                }),
                message_handlers: HandlerRegistry::new(),
                open_handlers: HandlerRegistry::new(),
                close_handlers: HandlerRegistry::new(),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }

    /// Register a consumer. The first consumer opens the transport.
    pub fn attach(&self) {
        self.shared.attach();
    }

    /// Register a consumer for as long as the returned guard lives
    pub fn attach_scoped(&self) -> Attachment {
        self.attach();
        Attachment {
            manager: Some(self.clone()),
        }
    }

    /// Release a consumer. The last consumer closes the transport and cancels
    /// any pending reconnect. Extra calls are ignored.
    pub fn detach(&self) {
        self.shared.detach();
    }

    /// Close the transport regardless of how many consumers are attached
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Encode `payload` as JSON and transmit it if the transport is open;
    /// otherwise the payload is dropped.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) {
        self.shared.send(payload);
    }

    pub fn on_message(&self, handler: MessageHandler) {
        self.shared.message_handlers.register(handler);
    }

    pub fn off_message(&self, handler: &MessageHandler) {
        self.shared.message_handlers.unregister(handler);
    }

    pub fn on_open(&self, handler: LifecycleHandler) {
        self.shared.open_handlers.register(handler);
    }

    pub fn off_open(&self, handler: &LifecycleHandler) {
        self.shared.open_handlers.unregister(handler);
    }

    pub fn on_close(&self, handler: LifecycleHandler) {
        self.shared.close_handlers.register(handler);
    }

    pub fn off_close(&self, handler: &LifecycleHandler) {
        self.shared.close_handlers.unregister(handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner().state
    }

    pub fn consumers(&self) -> usize {
        self.shared.inner().consumers
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.inner().attempts
    }

    /// Retries are used up; resumes on the next attach from zero consumers
    pub fn is_exhausted(&self) -> bool {
        self.shared.inner().exhausted
    }

    pub fn stats(&self) -> ChannelStats {
        let shared = &self.shared;
        let inner = shared.inner();
        ChannelStats {
            channel: shared.channel.clone(),
            url: shared.url.clone(),
            state: inner.state,
            consumers: inner.consumers,
            reconnect_attempts: inner.attempts,
            max_reconnect_attempts: shared.policy.max_attempts,
            exhausted: inner.exhausted,
            total_opens: inner.total_opens,
            frames_received: inner.frames_received,
            frames_dropped: inner.frames_dropped,
            sends_dropped: inner.sends_dropped,
            message_handlers: shared.message_handlers.len(),
            open_handlers: shared.open_handlers.len(),
            close_handlers: shared.close_handlers.len(),
            last_opened_at: inner.last_opened_at,
            connection_id: inner.connection_id,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("channel", &self.shared.channel)
            .field("url", &self.shared.url)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        inner.state = state;
        FeedMetrics::set_state(&self.channel, state);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner().generation == generation
    }

    fn attach(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner();
            inner.consumers += 1;
            FeedMetrics::set_consumers(&self.channel, inner.consumers);
            tracing::debug!(channel = %self.channel, consumers = inner.consumers, "Consumer attached");

            // Closing: a teardown on another thread has not finished yet
            let idle = matches!(
                inner.state,
                ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed
            );
            if inner.consumers == 1 && idle && inner.retry.is_none() {
                inner.attempts = 0;
                inner.exhausted = false;
                Some(self.begin_attempt(&mut inner))
            } else {
                None
            }
        };

        if let Some(generation) = generation {
            self.open_transport(generation);
        }
    }

    fn detach(self: &Arc<Self>) {
        let teardown = {
            let mut inner = self.inner();
            if inner.consumers == 0 {
                drop(inner);
                tracing::warn!(channel = %self.channel, "Detach without a matching attach, ignoring");
                return;
            }

            inner.consumers -= 1;
            FeedMetrics::set_consumers(&self.channel, inner.consumers);
            tracing::debug!(channel = %self.channel, consumers = inner.consumers, "Consumer detached");

            if inner.consumers > 0 {
                return;
            }
            self.teardown(&mut inner)
        };

        self.finish_teardown(teardown);
    }

    fn shutdown(self: &Arc<Self>) {
        let teardown = {
            let mut inner = self.inner();
            if inner.consumers == 0 && inner.link.is_none() && inner.retry.is_none() {
                return;
            }
            inner.consumers = 0;
            FeedMetrics::set_consumers(&self.channel, 0);
            self.teardown(&mut inner)
        };

        tracing::info!(channel = %self.channel, "Shutting down channel");
        self.finish_teardown(teardown);
    }

    /// Start a new transport attempt; returns its generation
    fn begin_attempt(&self, inner: &mut Inner) -> u64 {
        inner.generation += 1;
        inner.connection_id = Some(Uuid::new_v4());
        self.set_state(inner, ConnectionState::Connecting);
        inner.generation
    }

    fn open_transport(self: &Arc<Self>, generation: u64) {
        let (connection_id, attempt) = {
            let inner = self.inner();
            (inner.connection_id, inner.attempts)
        };

        tracing::info!(
            channel = %self.channel,
            url = %self.url,
            connection_id = ?connection_id,
            attempt = attempt,
            "Opening transport"
        );
        FeedMetrics::record_attempt(&self.channel);

        let weak = Arc::downgrade(self);
        let sink = TransportSink::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_event(generation, event);
            }
        });

        let link = self.transport.open(&self.url, sink);

        let stale = {
            let mut inner = self.inner();
            let live = matches!(inner.state, ConnectionState::Connecting | ConnectionState::Open);
            if inner.generation == generation && live {
                inner.link = Some(link);
                None
            } else {
                Some(link)
            }
        };

        // Superseded while opening
        if let Some(mut link) = stale {
            link.close();
        }
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(generation),
            TransportEvent::Message(text) => self.on_frame(generation, &text),
            TransportEvent::Error(error) => {
                if self.is_current(generation) {
                    tracing::warn!(channel = %self.channel, error = %error, "Transport error");
                }
            }
            TransportEvent::Closed { reason } => self.on_closed(generation, reason),
        }
    }

    fn on_opened(&self, generation: u64) {
        let connection_id = {
            let mut inner = self.inner();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                tracing::debug!(channel = %self.channel, "Ignoring open from a superseded transport");
                return;
            }
            inner.attempts = 0;
            inner.exhausted = false;
            inner.total_opens += 1;
            inner.last_opened_at = Some(Utc::now());
            self.set_state(&mut inner, ConnectionState::Open);
            inner.connection_id
        };

        FeedMetrics::record_open(&self.channel);
        tracing::info!(channel = %self.channel, connection_id = ?connection_id, "Transport connected");

        for handler in self.open_handlers.snapshot() {
            handler();
        }
    }

    fn on_frame(&self, generation: u64, text: &str) {
        let decoded = {
            let mut inner = self.inner();
            if inner.generation != generation || inner.state != ConnectionState::Open {
                return;
            }
            let decoded = Payload::decode(text);
            match &decoded {
                Ok(_) => inner.frames_received += 1,
                Err(_) => inner.frames_dropped += 1,
            }
            decoded
        };

        match decoded {
            Ok(payload) => {
                FeedMetrics::record_frame(&self.channel);
                for handler in self.message_handlers.snapshot() {
                    handler(&payload);
                }
            }
            Err(e) => {
                FeedMetrics::record_frame_dropped(&self.channel);
                tracing::warn!(
                    channel = %self.channel,
                    error = %e,
                    frame_len = text.len(),
                    "Failed to decode frame, dropping it"
                );
            }
        }
    }

    fn on_closed(self: &Arc<Self>, generation: u64, reason: Option<String>) {
        let (was_open, link) = {
            let mut inner = self.inner();
            let live = matches!(inner.state, ConnectionState::Connecting | ConnectionState::Open);
            if inner.generation != generation || !live {
                return;
            }
            let was_open = inner.state == ConnectionState::Open;
            self.set_state(&mut inner, ConnectionState::Closed);
            (was_open, inner.link.take())
        };
        drop(link);

        if was_open {
            FeedMetrics::record_close(&self.channel, "dropped");
            tracing::warn!(channel = %self.channel, reason = ?reason, "Transport disconnected");
        } else {
            FeedMetrics::record_close(&self.channel, "failed");
            tracing::warn!(channel = %self.channel, reason = ?reason, "Transport failed to connect");
        }

        for handler in self.close_handlers.snapshot() {
            handler();
        }

        // Close handlers may have detached; decide only now
        self.schedule_retry(generation);
    }

    fn schedule_retry(self: &Arc<Self>, generation: u64) {
        let (attempt, delay) = {
            let mut inner = self.inner();
            if inner.generation != generation
                || inner.state != ConnectionState::Closed
                || inner.consumers == 0
            {
                return;
            }

            if !self.policy.allows_retry(inner.attempts) {
                inner.exhausted = true;
                drop(inner);
                FeedMetrics::record_exhausted(&self.channel);
                tracing::error!(
                    channel = %self.channel,
                    max_attempts = self.policy.max_attempts,
                    "Max reconnect attempts reached, channel paused until the next attach"
                );
                return;
            }

            inner.attempts += 1;
            (inner.attempts, self.policy.delay_for(inner.attempts))
        };

        tracing::info!(
            channel = %self.channel,
            attempt = attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        FeedMetrics::record_reconnect_scheduled(&self.channel);

        let deadline = tokio::time::Instant::now() + delay;
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(shared) = weak.upgrade() {
                shared.retry_fired(generation);
            }
        });

        let mut inner = self.inner();
        if inner.generation == generation && inner.consumers > 0 {
            if let Some(previous) = inner.retry.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    fn retry_fired(self: &Arc<Self>, generation: u64) {
        let next = {
            let mut inner = self.inner();
            if inner.generation != generation {
                return;
            }
            inner.retry = None;
            if inner.consumers == 0 || inner.state != ConnectionState::Closed {
                return;
            }
            self.begin_attempt(&mut inner)
        };

        self.open_transport(next);
    }

    /// Invalidate the current attempt and take what it holds
    fn teardown(&self, inner: &mut Inner) -> Teardown {
        inner.generation += 1;
        let was_open = inner.state == ConnectionState::Open;
        if matches!(inner.state, ConnectionState::Connecting | ConnectionState::Open) {
            self.set_state(inner, ConnectionState::Closing);
        }

        Teardown {
            generation: inner.generation,
            was_open,
            link: inner.link.take(),
            retry: inner.retry.take(),
        }
    }

    fn finish_teardown(&self, teardown: Teardown) {
        if let Some(retry) = teardown.retry {
            retry.abort();
            tracing::debug!(channel = %self.channel, "Cancelled pending reconnect");
        }

        if let Some(mut link) = teardown.link {
            link.close();
        }

        {
            let mut inner = self.inner();
            if inner.generation == teardown.generation && inner.state == ConnectionState::Closing {
                inner.connection_id = None;
                self.set_state(&mut inner, ConnectionState::Closed);
            }
        }

        if teardown.was_open {
            FeedMetrics::record_close(&self.channel, "teardown");
            tracing::info!(channel = %self.channel, "Transport closed, no consumers remain");
            for handler in self.close_handlers.snapshot() {
                handler();
            }
        } else {
            tracing::debug!(channel = %self.channel, "Channel released");
        }
    }

    fn send<T: Serialize + ?Sized>(&self, payload: &T) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                self.inner().sends_dropped += 1;
                FeedMetrics::record_send_dropped(&self.channel, "encode");
                tracing::warn!(channel = %self.channel, error = %e, "Failed to encode outbound payload, dropping it");
                return;
            }
        };

        let (state, result) = {
            let mut inner = self.inner();
            let state = inner.state;
            let result = match (state, inner.link.as_mut()) {
                (ConnectionState::Open, Some(link)) => Some(link.send_text(text)),
                _ => None,
            };
            if !matches!(result, Some(Ok(()))) {
                inner.sends_dropped += 1;
            }
            (state, result)
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                FeedMetrics::record_send_dropped(&self.channel, "transport");
                tracing::warn!(channel = %self.channel, error = %e, "Failed to send payload, dropping it");
            }
            None => {
                FeedMetrics::record_send_dropped(&self.channel, "not_connected");
                tracing::warn!(channel = %self.channel, state = %state, "Channel is not connected, dropping payload");
            }
        }
    }
}

/// A consumer registration that detaches when dropped
#[must_use = "dropping an Attachment detaches immediately"]
pub struct Attachment {
    manager: Option<ConnectionManager>,
}

impl Attachment {
    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    /// Detach now
    pub fn release(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.detach();
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            manager.detach();
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("channel", &self.manager.as_ref().map(|m| m.channel().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn manager(transport: &MemoryTransport) -> ConnectionManager {
        ConnectionManager::new(
            "/ws/unit",
            "ws://test/ws/unit",
            ReconnectPolicy::fixed(5, Duration::from_millis(3000)),
            Arc::new(transport.clone()),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, LifecycleHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: LifecycleHandler = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[tokio::test]
    async fn test_open_sets_state_and_fires_handlers() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);
        let (opens, on_open) = counter();
        manager.on_open(on_open);

        manager.attach();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        transport.last().unwrap().open();
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        let stats = manager.stats();
        assert_eq!(stats.total_opens, 1);
        assert!(stats.last_opened_at.is_some());
        assert!(stats.connection_id.is_some());
    }

    #[tokio::test]
    async fn test_send_when_open_reaches_transport() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);

        manager.attach();
        let conn = transport.last().unwrap();
        conn.open();

        manager.send(&json!({"type": "subscribe", "symbols": ["600519"]}));
        assert_eq!(
            conn.sent(),
            vec![r#"{"symbols":["600519"],"type":"subscribe"}"#.to_string()]
        );
    }

    /// Keeps every sink so stale connections can still emit
    #[derive(Default)]
    struct CapturingTransport {
        sinks: Mutex<Vec<TransportSink>>,
    }

    struct NullLink;

    impl TransportLink for NullLink {
        fn send_text(&mut self, _text: String) -> Result<(), crate::transport::TransportError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    impl Transport for CapturingTransport {
        fn open(&self, _url: &str, sink: TransportSink) -> Box<dyn TransportLink> {
            self.sinks.lock().unwrap().push(sink);
            Box::new(NullLink)
        }
    }

    #[tokio::test]
    async fn test_events_from_superseded_transport_are_ignored() {
        let transport = Arc::new(CapturingTransport::default());
        let manager = ConnectionManager::new(
            "/ws/unit",
            "ws://test/ws/unit",
            ReconnectPolicy::default(),
            transport.clone(),
        );
        let (opens, on_open) = counter();
        let (closes, on_close) = counter();
        manager.on_open(on_open);
        manager.on_close(on_close);

        manager.attach();
        manager.detach();
        manager.attach();

        let sinks = transport.sinks.lock().unwrap().clone();
        assert_eq!(sinks.len(), 2);

        sinks[0].emit(TransportEvent::Opened);
        sinks[0].emit(TransportEvent::Closed { reason: None });
        assert_eq!(opens.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        sinks[1].emit(TransportEvent::Opened);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_close_handler_may_detach() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);

        let reentrant = manager.clone();
        manager.on_close(Arc::new(move || reentrant.detach()));

        manager.attach();
        transport.last().unwrap().fail("refused");

        assert_eq!(manager.consumers(), 0);
        assert_eq!(manager.reconnect_attempts(), 0);
        assert!(manager.shared.inner().retry.is_none());
    }

    #[tokio::test]
    async fn test_message_handler_may_send() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);

        let responder = manager.clone();
        manager.on_message(Arc::new(move |payload: &Payload| {
            if payload.kind() == Some("ping") {
                responder.send(&json!({"type": "pong"}));
            }
        }));

        manager.attach();
        let conn = transport.last().unwrap();
        conn.open();
        conn.message(r#"{"type":"ping"}"#);

        assert_eq!(conn.sent(), vec![r#"{"type":"pong"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_teardown_of_open_transport_fires_close_handlers() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);
        let (closes, on_close) = counter();
        manager.on_close(on_close);

        manager.attach();
        let conn = transport.last().unwrap();
        conn.open();
        manager.detach();

        assert!(conn.is_closed_locally());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(manager.stats().connection_id.is_none());
    }

    #[tokio::test]
    async fn test_scoped_attachment_detaches_once() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);

        let first = manager.attach_scoped();
        let second = manager.attach_scoped();
        assert_eq!(manager.consumers(), 2);
        assert_eq!(first.manager().map(|m| m.channel()), Some("/ws/unit"));
        assert_eq!(transport.open_count(), 1);

        drop(first);
        assert_eq!(manager.consumers(), 1);

        second.release();
        assert_eq!(manager.consumers(), 0);
        assert!(transport.last().unwrap().is_closed_locally());
    }

    /// First link blocks in `close` until released; later links are inert
    struct GatedTransport {
        opens: AtomicUsize,
        entered: mpsc::Sender<()>,
        release: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    struct GatedLink {
        entered: mpsc::Sender<()>,
        release: Arc<Mutex<mpsc::Receiver<()>>>,
    }

    impl TransportLink for GatedLink {
        fn send_text(&mut self, _text: String) -> Result<(), crate::transport::TransportError> {
            Ok(())
        }

        fn close(&mut self) {
            let _ = self.entered.send(());
            let _ = self.release.lock().unwrap().recv();
        }
    }

    impl Transport for GatedTransport {
        fn open(&self, _url: &str, _sink: TransportSink) -> Box<dyn TransportLink> {
            if self.opens.fetch_add(1, Ordering::SeqCst) == 0 {
                Box::new(GatedLink {
                    entered: self.entered.clone(),
                    release: self.release.clone(),
                })
            } else {
                Box::new(NullLink)
            }
        }
    }

    #[test]
    fn test_attach_during_unfinished_teardown_reconnects() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let transport = Arc::new(GatedTransport {
            opens: AtomicUsize::new(0),
            entered: entered_tx,
            release: Arc::new(Mutex::new(release_rx)),
        });
        let manager = ConnectionManager::new(
            "/ws/unit",
            "ws://test/ws/unit",
            ReconnectPolicy::default(),
            transport.clone(),
        );

        manager.attach();
        std::thread::scope(|s| {
            let detaching = manager.clone();
            s.spawn(move || detaching.detach());

            // The detaching thread is inside `close`, state still Closing
            entered_rx.recv().unwrap();
            manager.attach();
            release_tx.send(()).unwrap();
        });

        assert_eq!(manager.consumers(), 1);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.shared.inner().link.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_ignores_consumer_count() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport);

        manager.attach();
        manager.attach();
        manager.attach();
        transport.last().unwrap().open();

        manager.shutdown();
        assert_eq!(manager.consumers(), 0);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(transport.last().unwrap().is_closed_locally());

        // Idempotent
        manager.shutdown();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }
}
