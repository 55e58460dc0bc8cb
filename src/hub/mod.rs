//! Broadcast hub: fan-out of change records to connected clients.

mod manager;
mod types;

pub use manager::BroadcastHub;
pub use types::{ChannelId, ClientHandle, ClientMessage, HubConfig};
