//! Feed subscriber: consumes the store's change stream and produces
//! canonical change records, strictly in arrival order.

use crate::feed::source::{ChangeSource, EventStream, RawChangeEvent, RawOperation, StreamItem};
use crate::types::{ChangeRecord, CollectionId, SequenceToken};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Feed subscriber configuration.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Attempt a point lookup on every update so records carry the
    /// post-image even when the raw event omits it.
    /// Default: true
    pub backfill_updates: bool,

    /// How long each stream poll waits before re-checking for shutdown.
    /// Default: 50ms
    pub poll_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backfill_updates: true,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Why a subscription closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Stopped deliberately, or the source shut down cleanly.
    Normal,
    /// The upstream collection was dropped or renamed. Not resumable.
    Invalidated,
    /// Transient feed failure. The caller may start a fresh subscription,
    /// resuming from the last known sequence token.
    Error(String),
}

/// Observable subscription state.
///
/// There is no transition out of `Closed`; a fresh `start` creates a new
/// subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedStatus {
    Idle,
    Subscribing,
    Active,
    Closed(CloseReason),
}

/// Events delivered to the consumer of a subscription.
///
/// `Closed` is terminal: it is sent exactly once, after the last record.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    Record(ChangeRecord),
    Closed(CloseReason),
}

/// Handle to a running subscription.
pub struct FeedHandle {
    receiver: Receiver<FeedEvent>,
    status: Arc<Mutex<FeedStatus>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl FeedHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// A clone of the event receiver, for consumers running on their own
    /// thread.
    pub fn receiver(&self) -> Receiver<FeedEvent> {
        self.receiver.clone()
    }

    /// Current subscription state.
    pub fn status(&self) -> FeedStatus {
        self.status.lock().clone()
    }

    /// Stop the subscription and wait for the worker to exit.
    ///
    /// The upstream stream is dropped when the worker returns; already
    /// queued events remain readable.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens and drives a change-stream subscription on a worker thread.
pub struct FeedSubscriber;

impl FeedSubscriber {
    /// Start a subscription for `collection`, optionally resuming from a
    /// previously recorded token. Without a token the stream begins from
    /// "now".
    ///
    /// There is no automatic retry: any failure closes the subscription and
    /// the surrounding process decides whether to call `start` again.
    pub fn start(
        source: Arc<dyn ChangeSource>,
        collection: CollectionId,
        resume: Option<SequenceToken>,
        config: FeedConfig,
    ) -> FeedHandle {
        let (sender, receiver) = unbounded();
        let status = Arc::new(Mutex::new(FeedStatus::Subscribing));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = {
            let status = Arc::clone(&status);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || {
                run_feed(source, collection, resume, config, sender, status, shutdown);
            })
        };

        FeedHandle {
            receiver,
            status,
            shutdown,
            worker: Some(worker),
        }
    }
}

fn run_feed(
    source: Arc<dyn ChangeSource>,
    collection: CollectionId,
    resume: Option<SequenceToken>,
    config: FeedConfig,
    sender: Sender<FeedEvent>,
    status: Arc<Mutex<FeedStatus>>,
    shutdown: Arc<AtomicBool>,
) {
    let mut stream: Box<dyn EventStream> = match source.subscribe(&collection, resume.as_ref()) {
        Ok(stream) => stream,
        Err(e) => {
            close(&sender, &status, CloseReason::Error(e.to_string()));
            return;
        }
    };

    *status.lock() = FeedStatus::Active;
    debug!(collection = %collection, "change feed active");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            close(&sender, &status, CloseReason::Normal);
            return;
        }

        match stream.poll(config.poll_interval) {
            StreamItem::Quiet => continue,
            StreamItem::End => {
                close(&sender, &status, CloseReason::Normal);
                return;
            }
            StreamItem::Failed(msg) => {
                warn!(collection = %collection, error = %msg, "change feed failed");
                close(&sender, &status, CloseReason::Error(msg));
                return;
            }
            StreamItem::Event(raw) => {
                let invalidating = raw.operation.is_invalidating();

                let Some(record) = normalize(&source, &collection, raw, &config) else {
                    continue;
                };

                if sender.send(FeedEvent::Record(record)).is_err() {
                    // Consumer went away; nothing left to deliver to.
                    close(&sender, &status, CloseReason::Normal);
                    return;
                }

                if invalidating {
                    close(&sender, &status, CloseReason::Invalidated);
                    return;
                }
            }
        }
    }
}

/// Normalize a raw store event into a canonical change record.
///
/// Runs on the feed worker, one event at a time, so normalization for event
/// N (including any backfill lookup) completes before event N+1 is accepted.
/// Returns `None` for malformed events that carry no document key.
fn normalize(
    source: &Arc<dyn ChangeSource>,
    collection: &CollectionId,
    raw: RawChangeEvent,
    config: &FeedConfig,
) -> Option<ChangeRecord> {
    if raw.operation.is_invalidating() {
        return Some(ChangeRecord::invalidate(collection.clone(), raw.token));
    }

    let Some(key) = raw.document_key else {
        warn!(
            collection = %collection,
            operation = ?raw.operation,
            "dropping change event without document key"
        );
        return None;
    };

    let record = match raw.operation {
        RawOperation::Insert => ChangeRecord::insert(
            collection.clone(),
            key,
            raw.full_document.unwrap_or(serde_json::Value::Null),
            raw.token,
        ),
        RawOperation::Replace => ChangeRecord::replace(
            collection.clone(),
            key,
            raw.full_document.unwrap_or(serde_json::Value::Null),
            raw.token,
        ),
        RawOperation::Delete => ChangeRecord::delete(collection.clone(), key, raw.token),
        RawOperation::Update => {
            // Always prefer a fresh post-image over whatever the raw event
            // carried. A failed lookup still emits the record: partial
            // information beats silent loss.
            let mut full_document = raw.full_document;
            if config.backfill_updates {
                match source.lookup(collection, &key) {
                    Ok(Some(document)) => full_document = Some(document),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            collection = %collection,
                            key = %key,
                            error = %e,
                            "backfill lookup failed, emitting partial record"
                        );
                    }
                }
            }
            ChangeRecord::update(
                collection.clone(),
                key,
                full_document,
                raw.changed_fields,
                raw.token,
            )
        }
        // Handled above.
        RawOperation::Drop | RawOperation::Rename | RawOperation::Invalidate => unreachable!(),
    };

    Some(record)
}

fn close(sender: &Sender<FeedEvent>, status: &Arc<Mutex<FeedStatus>>, reason: CloseReason) {
    let _ = sender.send(FeedEvent::Closed(reason.clone()));
    *status.lock() = FeedStatus::Closed(reason);
}
