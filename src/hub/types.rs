//! Client-facing types for the broadcast hub.

use crate::types::{ChangeOperation, ChangeRecord, ChangedFields, CollectionId, DocumentKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Unique identifier for a connected client channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Max queued messages per channel before the channel is dropped.
    /// Default: 256
    pub buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { buffer_size: 256 }
    }
}

/// Message pushed to clients, unsolicited. One type only.
///
/// The sequence token is pipeline-internal and deliberately absent here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    OrderChanged {
        operation: ChangeOperation,
        namespace: CollectionId,
        document_key: DocumentKey,
        /// Null for delete, invalidate, and failed backfill.
        full_document: Option<Value>,
        /// Null unless the operation is an update.
        changed_fields: Option<ChangedFields>,
    },
}

impl ClientMessage {
    /// Build the outbound message for a change record.
    pub fn order_changed(record: &ChangeRecord) -> Self {
        ClientMessage::OrderChanged {
            operation: record.operation,
            namespace: record.collection.clone(),
            document_key: record.document_key.clone(),
            full_document: record.full_document.clone(),
            changed_fields: record.changed_fields.clone(),
        }
    }
}

/// Handle held by the transport layer for one connected client.
pub struct ClientHandle {
    pub id: ChannelId,
    /// Channel to receive pushed messages.
    pub receiver: crossbeam_channel::Receiver<ClientMessage>,
}

impl ClientHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> Result<ClientMessage, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> Result<ClientMessage, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ClientMessage, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
