//! Failure and recovery tests for the pipeline.

use change_relay::{
    ChangeOperation, ClientMessage, CloseReason, CollectionId, DocumentKey, FeedStatus,
    MemorySource, Relay, RelayConfig, RelayError,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn orders() -> CollectionId {
    CollectionId::new("orders")
}

fn key(k: &str) -> DocumentKey {
    DocumentKey::new(k)
}

fn start_relay(source: &MemorySource) -> Relay {
    let relay = Relay::new(Arc::new(source.clone()), RelayConfig::new(orders()));
    relay.start(None).unwrap();
    wait_active(&relay);
    relay
}

fn wait_active(relay: &Relay) {
    for _ in 0..100 {
        if relay.status() == FeedStatus::Active {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("relay never became active, status: {:?}", relay.status());
}

fn wait_closed(relay: &Relay) -> CloseReason {
    for _ in 0..100 {
        if let FeedStatus::Closed(reason) = relay.status() {
            return reason;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("relay never closed, status: {:?}", relay.status());
}

// --- Transient Feed Failure ---

#[test]
fn test_feed_error_stops_deliveries_until_restart() {
    let source = MemorySource::new();
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    source.insert(&orders(), &key("1"), json!({"id": 1}));
    assert!(client.recv_timeout(Duration::from_secs(1)).is_ok());

    source.fail("network drop");
    assert!(matches!(wait_closed(&relay), CloseReason::Error(_)));

    // Writes continue upstream, but nothing reaches clients.
    source.insert(&orders(), &key("2"), json!({"id": 2}));
    assert!(client.recv_timeout(Duration::from_millis(200)).is_err());

    // Explicit restart from the retained token replays the missed event.
    let token = relay.resume_token();
    assert!(token.is_some());
    relay.start(token).unwrap();
    wait_active(&relay);

    let ClientMessage::OrderChanged { document_key, .. } =
        client.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(document_key, key("2"));
}

#[test]
fn test_restart_without_token_accepts_the_gap() {
    let source = MemorySource::new();
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    source.fail("network drop");
    wait_closed(&relay);

    // Missed while down; no token retained, so this event is gone.
    source.insert(&orders(), &key("1"), json!({"id": 1}));

    relay.start(None).unwrap();
    wait_active(&relay);
    assert!(client.recv_timeout(Duration::from_millis(200)).is_err());

    // Live events flow again.
    source.insert(&orders(), &key("2"), json!({"id": 2}));
    let ClientMessage::OrderChanged { document_key, .. } =
        client.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(document_key, key("2"));
}

#[test]
fn test_start_while_running_fails() {
    let source = MemorySource::new();
    let relay = start_relay(&source);

    let result = relay.start(None);
    assert!(matches!(result, Err(RelayError::AlreadyStarted)));
}

// --- Invalidation ---

#[test]
fn test_collection_drop_delivers_terminal_invalidate() {
    let source = MemorySource::new();
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    source.invalidate(&orders());

    let ClientMessage::OrderChanged {
        operation,
        full_document,
        ..
    } = client.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(operation, ChangeOperation::Invalidate);
    assert!(full_document.is_none());

    // Permanently closed; no auto-resubscribe.
    assert_eq!(wait_closed(&relay), CloseReason::Invalidated);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(wait_closed(&relay), CloseReason::Invalidated);
}

// --- Backfill Failure ---

#[test]
fn test_failed_backfill_still_delivers_changed_fields() {
    let source = MemorySource::new();
    source.insert(&orders(), &key("200"), json!({"id": 200, "status": "pending"}));
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    source.fail_lookups(true);
    let mut fields = serde_json::Map::new();
    fields.insert("status".to_string(), json!("shipped"));
    source.update(&orders(), &key("200"), fields).unwrap();

    let ClientMessage::OrderChanged {
        operation,
        full_document,
        changed_fields,
        ..
    } = client.recv_timeout(Duration::from_secs(1)).unwrap();

    // Partial information beats silent loss.
    assert_eq!(operation, ChangeOperation::Update);
    assert!(full_document.is_none());
    assert_eq!(changed_fields.unwrap().updated["status"], json!("shipped"));
}

// --- Shutdown ---

#[test]
fn test_stop_is_idempotent_and_keeps_clients() {
    let source = MemorySource::new();
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    relay.stop();
    relay.stop();
    assert_eq!(relay.status(), FeedStatus::Idle);

    // Clients stay registered and pick up after a restart.
    assert_eq!(relay.hub().channel_count(), 1);
    relay.start(None).unwrap();
    wait_active(&relay);

    source.insert(&orders(), &key("1"), json!({"id": 1}));
    assert!(client.recv_timeout(Duration::from_secs(1)).is_ok());
}

#[test]
fn test_stopped_relay_broadcasts_nothing() {
    let source = MemorySource::new();
    let relay = start_relay(&source);
    let client = relay.hub().connect();

    relay.stop();
    source.insert(&orders(), &key("1"), json!({"id": 1}));

    assert!(client.recv_timeout(Duration::from_millis(200)).is_err());
}
