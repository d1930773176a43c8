//! Channel lifecycle integration tests
//!
//! Drive a channel through attach, detach, failure and reconnection using the
//! in-memory transport and a paused Tokio clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use arena_live_feed::feed::{ConnectionManager, ConnectionState, MessageHandler, Payload};
use arena_live_feed::reconnect::ReconnectPolicy;
use arena_live_feed::transport::MemoryTransport;

const RETRY_DELAY: Duration = Duration::from_millis(3000);

fn create_channel(transport: &MemoryTransport, path: &str) -> ConnectionManager {
    ConnectionManager::new(
        path,
        format!("ws://localhost:8888{}", path),
        ReconnectPolicy::fixed(5, RETRY_DELAY),
        Arc::new(transport.clone()),
    )
}

/// Let spawned retry timers run
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Fire the pending retry timer
async fn wait_for_retry() {
    settle().await;
    tokio::time::advance(RETRY_DELAY).await;
    settle().await;
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> MessageHandler {
    let log = log.clone();
    Arc::new(move |payload: &Payload| {
        let kind = payload.kind().unwrap_or("untyped");
        log.lock().unwrap().push(format!("{}:{}", name, kind));
    })
}

// ============================================================================
// Reference counting
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transport_exists_while_consumers_remain() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/trading");

    // Extra detach on a fresh channel is ignored
    channel.detach();
    assert_eq!(channel.consumers(), 0);
    assert_eq!(transport.open_count(), 0);

    channel.attach();
    channel.attach();
    channel.attach();
    assert_eq!(transport.open_count(), 1);
    assert_eq!(channel.state(), ConnectionState::Connecting);

    channel.detach();
    channel.detach();
    assert!(!transport.last().unwrap().is_closed_locally());

    channel.detach();
    assert!(transport.last().unwrap().is_closed_locally());
    assert_eq!(channel.state(), ConnectionState::Closed);

    channel.detach();
    assert_eq!(channel.consumers(), 0);

    // Re-attaching opens a fresh transport
    channel.attach();
    assert_eq!(transport.open_count(), 2);
    assert_eq!(transport.last().unwrap().url(), "ws://localhost:8888/ws/trading");
}

#[tokio::test(start_paused = true)]
async fn test_only_one_transport_in_flight_across_churn() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/market");

    for _ in 0..3 {
        channel.attach();
        channel.detach();
        channel.attach();
    }

    let live: Vec<_> = transport
        .connections()
        .into_iter()
        .filter(|c| !c.is_closed_locally())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(channel.consumers(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_detach_to_zero_cancels_pending_retry() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/chats");

    channel.attach();
    transport.last().unwrap().fail("connection refused");
    assert_eq!(channel.reconnect_attempts(), 1);

    channel.detach();
    tokio::time::advance(RETRY_DELAY * 4).await;
    settle().await;

    assert_eq!(transport.open_count(), 1);
    assert_eq!(channel.state(), ConnectionState::Closed);
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_attempt_counter() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/trading");
    channel.attach();

    for expected in 1..=3 {
        transport.last().unwrap().fail("connection refused");
        assert_eq!(channel.reconnect_attempts(), expected);
        wait_for_retry().await;
    }
    assert_eq!(transport.open_count(), 4);

    transport.last().unwrap().open();
    assert_eq!(channel.state(), ConnectionState::Open);
    assert_eq!(channel.reconnect_attempts(), 0);

    transport.last().unwrap().close_remote(Some("server restart"));
    assert_eq!(channel.reconnect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_attempts() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/performance");
    channel.attach();

    for _ in 0..5 {
        transport.last().unwrap().fail("connection refused");
        wait_for_retry().await;
    }
    assert_eq!(transport.open_count(), 6);
    assert_eq!(channel.reconnect_attempts(), 5);

    transport.last().unwrap().fail("connection refused");
    assert!(channel.is_exhausted());

    tokio::time::advance(RETRY_DELAY * 10).await;
    settle().await;
    assert_eq!(transport.open_count(), 6);
    assert_eq!(channel.state(), ConnectionState::Closed);
    assert_eq!(channel.consumers(), 1);

    // Extra consumers do not resume a paused channel
    channel.attach();
    assert_eq!(transport.open_count(), 6);

    // A fresh attach from zero does
    channel.detach();
    channel.detach();
    channel.attach();
    assert_eq!(transport.open_count(), 7);
    assert!(!channel.is_exhausted());
    assert_eq!(channel.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_retry_follows_remaining_consumers() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/x");

    channel.attach();
    channel.attach();
    assert_eq!(transport.open_count(), 1);

    transport.last().unwrap().fail("connection refused");
    assert_eq!(channel.reconnect_attempts(), 1);
    settle().await;

    tokio::time::advance(Duration::from_millis(1000)).await;
    channel.detach();
    assert_eq!(channel.consumers(), 1);

    tokio::time::advance(Duration::from_millis(1999)).await;
    settle().await;
    assert_eq!(transport.open_count(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    settle().await;
    assert_eq!(transport.open_count(), 2);
    assert_eq!(channel.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn test_retry_cancelled_when_last_consumer_leaves() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/x");

    channel.attach();
    channel.attach();
    transport.last().unwrap().fail("connection refused");
    settle().await;

    tokio::time::advance(Duration::from_millis(1000)).await;
    channel.detach();
    tokio::time::advance(Duration::from_millis(1000)).await;
    channel.detach();

    tokio::time::advance(Duration::from_millis(5000)).await;
    settle().await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(channel.consumers(), 0);
}

// ============================================================================
// Handlers and frames
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_message_handlers_fire_in_registration_order() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/trading");
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = recorder(&log, "a");
    let b = recorder(&log, "b");
    channel.on_message(a.clone());
    channel.on_message(b);

    channel.attach();
    let conn = transport.last().unwrap();
    conn.open();

    conn.message(r#"{"type":"trading_update","data":{}}"#);
    assert_eq!(*log.lock().unwrap(), vec!["a:trading_update", "b:trading_update"]);

    channel.off_message(&a);
    conn.message(r#"{"type":"portfolio_update","data":{}}"#);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["a:trading_update", "b:trading_update", "b:portfolio_update"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_handlers_survive_reconnection() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/chats");
    let log = Arc::new(Mutex::new(Vec::new()));
    channel.on_message(recorder(&log, "chat"));

    channel.attach();
    transport.last().unwrap().open();
    transport.last().unwrap().close_remote(None);
    wait_for_retry().await;

    let conn = transport.last().unwrap();
    conn.open();
    conn.message(r#"{"type":"chat_message"}"#);

    assert_eq!(*log.lock().unwrap(), vec!["chat:chat_message"]);
    assert_eq!(channel.stats().total_opens, 2);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_dropped() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/market");
    let log = Arc::new(Mutex::new(Vec::new()));
    channel.on_message(recorder(&log, "quote"));

    channel.attach();
    let conn = transport.last().unwrap();
    conn.open();

    conn.message("{not json");
    assert_eq!(channel.state(), ConnectionState::Open);
    assert!(log.lock().unwrap().is_empty());

    conn.message(r#"{"type":"market_update"}"#);
    conn.message(r#"[1, 2, 3]"#);
    assert_eq!(*log.lock().unwrap(), vec!["quote:market_update", "quote:untyped"]);

    let stats = channel.stats();
    assert_eq!(stats.message_handlers, 1);
    assert_eq!(stats.frames_received, 2);
    assert_eq!(stats.frames_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_handlers() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/trading");
    let log = Arc::new(Mutex::new(Vec::new()));

    let opened = log.clone();
    channel.on_open(Arc::new(move || opened.lock().unwrap().push("open")));
    let closed = log.clone();
    channel.on_close(Arc::new(move || closed.lock().unwrap().push("close")));

    channel.attach();
    transport.last().unwrap().fail("connection refused");
    wait_for_retry().await;
    transport.last().unwrap().open();
    channel.detach();

    assert_eq!(*log.lock().unwrap(), vec!["close", "open", "close"]);
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_transport() {
    let transport = MemoryTransport::new();
    let channel = create_channel(&transport, "/ws/trading");

    // No transport at all
    channel.send(&json!({"type": "subscribe"}));

    channel.attach();
    let conn = transport.last().unwrap();
    channel.send(&json!({"type": "subscribe"}));
    assert!(conn.sent().is_empty());

    conn.open();
    channel.send(&json!({"type": "subscribe"}));
    assert_eq!(conn.sent(), vec![r#"{"type":"subscribe"}"#.to_string()]);

    conn.close_remote(None);
    channel.send(&json!({"type": "subscribe"}));
    assert_eq!(conn.sent().len(), 1);
    assert_eq!(channel.stats().sends_dropped, 3);
}
