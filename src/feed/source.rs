//! Store abstraction consumed by the feed subscriber.
//!
//! The storage engine is an external collaborator. The pipeline only needs
//! two things from it: a collection-scoped stream of native change events,
//! and a point lookup by document key for backfilling update post-images.

use crate::error::Result;
use crate::types::{ChangedFields, CollectionId, DocumentKey, SequenceToken};
use serde_json::Value;
use std::time::Duration;

/// Operation tag as the store's driver reports it, before normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawOperation {
    Insert,
    Update,
    Replace,
    Delete,
    /// Collection was dropped.
    Drop,
    /// Collection was renamed.
    Rename,
    /// Driver-level invalidation of the stream.
    Invalidate,
}

impl RawOperation {
    /// Whether this event permanently invalidates the subscription.
    pub fn is_invalidating(self) -> bool {
        matches!(
            self,
            RawOperation::Drop | RawOperation::Rename | RawOperation::Invalidate
        )
    }
}

/// One change event as emitted by the store, before normalization.
///
/// `full_document` may be absent on update even when the document still
/// exists; the subscriber backfills it with a point lookup.
#[derive(Clone, Debug)]
pub struct RawChangeEvent {
    pub operation: RawOperation,
    pub document_key: Option<DocumentKey>,
    pub full_document: Option<Value>,
    pub changed_fields: Option<ChangedFields>,
    pub token: SequenceToken,
}

/// Outcome of one poll of an event stream.
#[derive(Debug)]
pub enum StreamItem {
    /// An event arrived.
    Event(RawChangeEvent),
    /// Nothing arrived within the poll interval; the stream is still open.
    Quiet,
    /// The stream ended cleanly (source shut down).
    End,
    /// The stream failed; no further events will arrive.
    Failed(String),
}

/// A live, collection-scoped change stream.
///
/// Pull-based with a bounded wait per poll, so a consumer can interleave
/// shutdown checks between events. Once `End` or `Failed` is returned the
/// stream is exhausted and every later poll must return the same.
pub trait EventStream: Send {
    fn poll(&mut self, timeout: Duration) -> StreamItem;
}

/// A store that can emit a change stream and answer point lookups.
pub trait ChangeSource: Send + Sync {
    /// Open a change stream for `collection`.
    ///
    /// With a resume token the stream replays events after that position;
    /// without one it begins from "now".
    fn subscribe(
        &self,
        collection: &CollectionId,
        resume: Option<&SequenceToken>,
    ) -> Result<Box<dyn EventStream>>;

    /// Fetch the current state of a document, or `None` if it does not
    /// exist. Used to backfill update events that omit the post-image.
    fn lookup(&self, collection: &CollectionId, key: &DocumentKey) -> Result<Option<Value>>;
}
