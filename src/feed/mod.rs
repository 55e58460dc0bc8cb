//! Feed subscription: consuming the store's change stream.
//!
//! [`FeedSubscriber`] opens a collection-scoped subscription against a
//! [`ChangeSource`], normalizes every native event into a canonical
//! [`crate::types::ChangeRecord`] (backfilling update post-images with point
//! lookups), and hands records to the consumer over a channel in strict
//! arrival order. Failure never retries silently: the subscription closes
//! and the surrounding process decides whether to start a new one.

mod memory;
mod source;
mod subscriber;

pub use memory::MemorySource;
pub use source::{ChangeSource, EventStream, RawChangeEvent, RawOperation, StreamItem};
pub use subscriber::{CloseReason, FeedConfig, FeedEvent, FeedHandle, FeedStatus, FeedSubscriber};
