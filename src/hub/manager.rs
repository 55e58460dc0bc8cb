//! Broadcast hub: fans each change record out to every connected client.

use crate::types::ChangeRecord;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{ChannelId, ClientHandle, ClientMessage, HubConfig};

/// Maintains the set of connected client channels and delivers each record
/// to every member, independently per channel.
///
/// Sends are `try_send`s into bounded per-channel queues: a slow or stalled
/// client overflows its own queue and is dropped, never blocking the feed or
/// the other clients. A failed send silently unregisters the channel; there
/// is no acknowledgment, no backpressure toward the subscriber, and no
/// catch-up for channels registered after a record was broadcast.
pub struct BroadcastHub {
    /// Active channels by ID.
    channels: RwLock<HashMap<ChannelId, Sender<ClientMessage>>>,
    /// Counter for generating channel IDs.
    next_id: AtomicU64,
    config: HubConfig,
}

impl BroadcastHub {
    /// Create a hub with default configuration.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Connect a new client: creates its bounded queue, registers it, and
    /// returns the handle the transport layer pumps into the socket.
    pub fn connect(&self) -> ClientHandle {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size);
        self.register(id, sender);
        ClientHandle { id, receiver }
    }

    /// Add a channel to the active set. Idempotent: registering an ID that
    /// is already present keeps the existing channel.
    pub fn register(&self, id: ChannelId, sender: Sender<ClientMessage>) {
        self.channels.write().entry(id).or_insert(sender);
    }

    /// Remove a channel from the active set. Idempotent if absent.
    pub fn unregister(&self, id: ChannelId) {
        if self.channels.write().remove(&id).is_some() {
            debug!(channel = %id, "client channel unregistered");
        }
    }

    /// Number of currently connected channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Deliver one record to every channel currently in the active set.
    ///
    /// Channels whose queue is full or whose receiver is gone are
    /// unregistered after the membership snapshot is released; the failure
    /// never surfaces as a pipeline error and never affects the others.
    pub fn broadcast(&self, record: &ChangeRecord) {
        let message = ClientMessage::order_changed(record);
        let mut to_remove = Vec::new();

        {
            let channels = self.channels.read();
            for (id, sender) in channels.iter() {
                if sender.try_send(message.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut channels = self.channels.write();
            for id in to_remove {
                if channels.remove(&id).is_some() {
                    warn!(channel = %id, "dropping client channel after failed send");
                }
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeRecord, CollectionId, DocumentKey, SequenceToken};
    use serde_json::json;
    use std::time::Duration;

    fn make_record(key: &str, position: u64) -> ChangeRecord {
        ChangeRecord::insert(
            CollectionId::new("orders"),
            DocumentKey::new(key),
            json!({"id": key}),
            SequenceToken::from_position(position),
        )
    }

    #[test]
    fn test_connect_unregister() {
        let hub = BroadcastHub::new();

        let handle = hub.connect();
        assert_eq!(hub.channel_count(), 1);

        hub.unregister(handle.id);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_register_is_idempotent() {
        let hub = BroadcastHub::new();
        let handle = hub.connect();

        let (other_sender, _other_receiver) = bounded(4);
        hub.register(handle.id, other_sender);
        assert_eq!(hub.channel_count(), 1);

        // The original channel is still the registered one.
        hub.broadcast(&make_record("1", 1));
        assert!(handle.recv_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let hub = BroadcastHub::new();
        let handle = hub.connect();

        hub.unregister(handle.id);
        hub.unregister(handle.id);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn test_broadcast_reaches_every_channel() {
        let hub = BroadcastHub::new();
        let a = hub.connect();
        let b = hub.connect();

        hub.broadcast(&make_record("1", 1));

        for handle in [&a, &b] {
            let message = handle.recv_timeout(Duration::from_millis(100)).unwrap();
            let ClientMessage::OrderChanged { document_key, .. } = message;
            assert_eq!(document_key, DocumentKey::new("1"));
        }
    }

    #[test]
    fn test_unregistered_channel_receives_nothing() {
        let hub = BroadcastHub::new();
        let gone = hub.connect();
        let stays = hub.connect();

        hub.unregister(gone.id);
        hub.broadcast(&make_record("1", 1));

        assert!(gone.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(stays.recv_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_slow_channel_dropped_without_affecting_others() {
        let hub = BroadcastHub::with_config(HubConfig { buffer_size: 2 });
        let slow = hub.connect();
        let fast = hub.connect();

        // Never drain `slow`; its queue overflows on the third record.
        for i in 0..5 {
            hub.broadcast(&make_record("1", i + 1));
            while fast.try_recv().is_ok() {}
        }

        assert_eq!(hub.channel_count(), 1);

        // The surviving channel still gets new records.
        hub.broadcast(&make_record("2", 10));
        assert!(fast.recv_timeout(Duration::from_millis(100)).is_ok());
        drop(slow);
    }

    #[test]
    fn test_disconnected_channel_dropped_on_next_broadcast() {
        let hub = BroadcastHub::new();
        let handle = hub.connect();
        let keeper = hub.connect();

        drop(handle);
        hub.broadcast(&make_record("1", 1));

        assert_eq!(hub.channel_count(), 1);
        assert!(keeper.recv_timeout(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_late_joiner_gets_no_catch_up() {
        let hub = BroadcastHub::new();
        let early = hub.connect();

        hub.broadcast(&make_record("1", 1));
        let late = hub.connect();

        assert!(early.recv_timeout(Duration::from_millis(100)).is_ok());
        assert!(late.recv_timeout(Duration::from_millis(50)).is_err());
    }
}
