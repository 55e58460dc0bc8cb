//! Relay tying the feed subscriber and the broadcast hub together.

use crate::error::{RelayError, Result};
use crate::feed::{ChangeSource, FeedConfig, FeedEvent, FeedHandle, FeedStatus, FeedSubscriber};
use crate::hub::{BroadcastHub, HubConfig};
use crate::types::{CollectionId, SequenceToken};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Relay configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// The one collection this relay propagates.
    pub collection: CollectionId,

    /// Feed subscriber settings.
    pub feed: FeedConfig,

    /// Broadcast hub settings.
    pub hub: HubConfig,
}

impl RelayConfig {
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            feed: FeedConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

/// A live subscription plus the thread moving its records to the hub.
struct Running {
    feed: FeedHandle,
    forwarder: JoinHandle<()>,
}

/// The change-feed propagation pipeline.
///
/// Owns the broadcast hub for the lifetime of the process; feed
/// subscriptions come and go across `start`/`stop` cycles while connected
/// clients stay registered. Resumption is explicit: after a transient feed
/// failure the caller decides whether to `start` again, typically from
/// [`Relay::resume_token`].
pub struct Relay {
    source: Arc<dyn ChangeSource>,
    hub: Arc<BroadcastHub>,
    config: RelayConfig,
    running: Mutex<Option<Running>>,
    /// Token of the last record handed to the hub.
    last_token: Arc<RwLock<Option<SequenceToken>>>,
}

impl Relay {
    pub fn new(source: Arc<dyn ChangeSource>, config: RelayConfig) -> Self {
        Self {
            source,
            hub: Arc::new(BroadcastHub::with_config(config.hub.clone())),
            config,
            running: Mutex::new(None),
            last_token: Arc::new(RwLock::new(None)),
        }
    }

    /// The hub the transport layer connects client channels to.
    pub fn hub(&self) -> Arc<BroadcastHub> {
        Arc::clone(&self.hub)
    }

    /// Current feed state. `Idle` before the first `start` and after `stop`.
    pub fn status(&self) -> FeedStatus {
        self.running
            .lock()
            .as_ref()
            .map(|running| running.feed.status())
            .unwrap_or(FeedStatus::Idle)
    }

    /// Sequence token of the last record broadcast, for resuming after a
    /// feed interruption. `None` means resume is not possible and a new
    /// subscription starts from "now", accepting the gap.
    pub fn resume_token(&self) -> Option<SequenceToken> {
        self.last_token.read().clone()
    }

    /// Open a feed subscription and start forwarding records to the hub.
    ///
    /// Fails with [`RelayError::AlreadyStarted`] while a subscription is
    /// live. A closed subscription may be replaced: each `start` is a fresh
    /// instance, there is no transition out of `Closed`.
    pub fn start(&self, resume: Option<SequenceToken>) -> Result<()> {
        let mut running = self.running.lock();

        if let Some(current) = running.as_ref() {
            if !matches!(current.feed.status(), FeedStatus::Closed(_)) {
                return Err(RelayError::AlreadyStarted);
            }
        }
        // Reap the previous, closed subscription.
        if let Some(mut old) = running.take() {
            old.feed.stop();
            let _ = old.forwarder.join();
        }

        let feed = FeedSubscriber::start(
            Arc::clone(&self.source),
            self.config.collection.clone(),
            resume,
            self.config.feed.clone(),
        );

        let receiver = feed.receiver();
        let hub = Arc::clone(&self.hub);
        let last_token = Arc::clone(&self.last_token);
        let collection = self.config.collection.clone();
        let forwarder = thread::spawn(move || {
            for event in receiver.iter() {
                match event {
                    FeedEvent::Record(record) => {
                        *last_token.write() = Some(record.sequence_token.clone());
                        hub.broadcast(&record);
                    }
                    FeedEvent::Closed(reason) => {
                        debug!(collection = %collection, reason = ?reason, "feed closed");
                        break;
                    }
                }
            }
        });

        *running = Some(Running { feed, forwarder });
        Ok(())
    }

    /// Close the feed subscription and stop forwarding.
    ///
    /// Connected clients stay registered with the hub; they simply receive
    /// no further pushes until a new subscription is started. Idempotent.
    pub fn stop(&self) {
        let mut running = self.running.lock();
        if let Some(mut current) = running.take() {
            current.feed.stop();
            let _ = current.forwarder.join();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop();
    }
}
