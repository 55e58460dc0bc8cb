//! # Change Relay
//!
//! A change-feed propagation pipeline: one upstream store emits an ordered
//! stream of mutation events for a collection, and the relay forwards each
//! event, in emission order, to every currently-connected client.
//!
//! ## Core Concepts
//!
//! - **Feed Subscriber**: long-lived subscription to the store's change
//!   stream; normalizes native events into canonical change records and
//!   backfills update post-images
//! - **Broadcast Hub**: synchronized membership set of client channels with
//!   independent, non-blocking per-channel delivery
//! - **Relay**: explicit start/stop lifecycle with resume tokens, so feed
//!   failure and recovery stay observable instead of hidden behind retries
//!
//! ## Example
//!
//! ```ignore
//! use change_relay::{CollectionId, MemorySource, Relay, RelayConfig};
//! use std::sync::Arc;
//!
//! let source = Arc::new(MemorySource::new());
//! let relay = Relay::new(source.clone(), RelayConfig::new(CollectionId::new("orders")));
//! relay.start(None)?;
//!
//! // The transport layer connects a client...
//! let client = relay.hub().connect();
//!
//! // ...and pumps pushed messages into its socket.
//! while let Ok(message) = client.recv() {
//!     send_to_socket(&message)?;
//! }
//! ```

pub mod error;
pub mod feed;
pub mod hub;
pub mod relay;
pub mod types;

// Re-exports
pub use error::{RelayError, Result};
pub use feed::{
    ChangeSource, CloseReason, EventStream, FeedConfig, FeedEvent, FeedHandle, FeedStatus,
    FeedSubscriber, MemorySource, RawChangeEvent, RawOperation, StreamItem,
};
pub use hub::{BroadcastHub, ChannelId, ClientHandle, ClientMessage, HubConfig};
pub use relay::{Relay, RelayConfig};
pub use types::*;
