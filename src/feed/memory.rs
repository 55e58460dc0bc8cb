//! In-process change source backed by a document map and an event log.
//!
//! Implements [`ChangeSource`] without any external store, which is enough
//! to exercise the whole pipeline: live streaming, resume-from-token replay,
//! backfill lookups, injected feed failures, and collection invalidation.
//! Used by the integration tests and benches.

use crate::error::{RelayError, Result};
use crate::feed::source::{ChangeSource, EventStream, RawChangeEvent, RawOperation, StreamItem};
use crate::types::{ChangedFields, CollectionId, DocumentKey, SequenceToken};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Signal pushed to open streams.
enum StreamSignal {
    Event(RawChangeEvent),
    Failed(String),
}

/// Event log and stream taps, mutated together so a new subscriber sees
/// each event exactly once (either replayed from the log or live).
struct FeedState {
    log: Vec<(CollectionId, RawChangeEvent)>,
    taps: Vec<(CollectionId, Sender<StreamSignal>)>,
}

struct Inner {
    documents: RwLock<HashMap<(CollectionId, DocumentKey), Value>>,
    feed: Mutex<FeedState>,
    next_position: AtomicU64,
    fail_lookups: AtomicBool,
}

/// An in-memory store with a change feed.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(HashMap::new()),
                feed: Mutex::new(FeedState {
                    log: Vec::new(),
                    taps: Vec::new(),
                }),
                next_position: AtomicU64::new(1),
                fail_lookups: AtomicBool::new(false),
            }),
        }
    }

    fn next_token(&self) -> SequenceToken {
        SequenceToken::from_position(self.inner.next_position.fetch_add(1, Ordering::SeqCst))
    }

    /// Append an event to the log and push it to matching open streams.
    fn emit(&self, collection: &CollectionId, event: RawChangeEvent) {
        let mut feed = self.inner.feed.lock();
        feed.log.push((collection.clone(), event.clone()));
        feed.taps
            .retain(|(c, tap)| c != collection || tap.send(StreamSignal::Event(event.clone())).is_ok());
    }

    /// Insert a document and emit an insert event carrying the full document.
    pub fn insert(
        &self,
        collection: &CollectionId,
        key: &DocumentKey,
        document: Value,
    ) -> SequenceToken {
        self.inner
            .documents
            .write()
            .insert((collection.clone(), key.clone()), document.clone());

        let token = self.next_token();
        self.emit(
            collection,
            RawChangeEvent {
                operation: RawOperation::Insert,
                document_key: Some(key.clone()),
                full_document: Some(document),
                changed_fields: None,
                token: token.clone(),
            },
        );
        token
    }

    /// Apply a sparse field update to an existing document.
    ///
    /// The emitted event carries the changed fields but, like many store
    /// drivers, omits the post-image; consumers are expected to backfill.
    pub fn update(
        &self,
        collection: &CollectionId,
        key: &DocumentKey,
        fields: serde_json::Map<String, Value>,
    ) -> Result<SequenceToken> {
        {
            let mut documents = self.inner.documents.write();
            let document = documents
                .get_mut(&(collection.clone(), key.clone()))
                .ok_or_else(|| RelayError::DocumentNotFound(key.to_string()))?;
            if let Value::Object(map) = document {
                for (field, value) in &fields {
                    map.insert(field.clone(), value.clone());
                }
            }
        }

        let token = self.next_token();
        self.emit(
            collection,
            RawChangeEvent {
                operation: RawOperation::Update,
                document_key: Some(key.clone()),
                full_document: None,
                changed_fields: Some(ChangedFields::updated(fields)),
                token: token.clone(),
            },
        );
        Ok(token)
    }

    /// Replace an existing document wholesale.
    pub fn replace(
        &self,
        collection: &CollectionId,
        key: &DocumentKey,
        document: Value,
    ) -> Result<SequenceToken> {
        {
            let mut documents = self.inner.documents.write();
            let slot = documents
                .get_mut(&(collection.clone(), key.clone()))
                .ok_or_else(|| RelayError::DocumentNotFound(key.to_string()))?;
            *slot = document.clone();
        }

        let token = self.next_token();
        self.emit(
            collection,
            RawChangeEvent {
                operation: RawOperation::Replace,
                document_key: Some(key.clone()),
                full_document: Some(document),
                changed_fields: None,
                token: token.clone(),
            },
        );
        Ok(token)
    }

    /// Delete a document.
    pub fn delete(&self, collection: &CollectionId, key: &DocumentKey) -> Result<SequenceToken> {
        self.inner
            .documents
            .write()
            .remove(&(collection.clone(), key.clone()))
            .ok_or_else(|| RelayError::DocumentNotFound(key.to_string()))?;

        let token = self.next_token();
        self.emit(
            collection,
            RawChangeEvent {
                operation: RawOperation::Delete,
                document_key: Some(key.clone()),
                full_document: None,
                changed_fields: None,
                token: token.clone(),
            },
        );
        Ok(token)
    }

    /// Drop a collection: removes its documents and emits an invalidating
    /// event to its streams.
    pub fn invalidate(&self, collection: &CollectionId) -> SequenceToken {
        self.inner
            .documents
            .write()
            .retain(|(c, _), _| c != collection);

        let token = self.next_token();
        self.emit(
            collection,
            RawChangeEvent {
                operation: RawOperation::Drop,
                document_key: None,
                full_document: None,
                changed_fields: None,
                token: token.clone(),
            },
        );
        token
    }

    /// Inject a transient feed failure: every open stream fails and closes.
    /// The log and documents are untouched, so a new subscription can
    /// resume from the last delivered token.
    pub fn fail(&self, message: &str) {
        let mut feed = self.inner.feed.lock();
        for (_, tap) in feed.taps.drain(..) {
            let _ = tap.send(StreamSignal::Failed(message.to_string()));
        }
    }

    /// Make subsequent point lookups fail, to exercise backfill failure.
    pub fn fail_lookups(&self, fail: bool) {
        self.inner.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Read a document directly (the read path clients use on connect).
    pub fn get(&self, collection: &CollectionId, key: &DocumentKey) -> Option<Value> {
        self.inner
            .documents
            .read()
            .get(&(collection.clone(), key.clone()))
            .cloned()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSource for MemorySource {
    fn subscribe(
        &self,
        collection: &CollectionId,
        resume: Option<&SequenceToken>,
    ) -> Result<Box<dyn EventStream>> {
        let (sender, receiver) = unbounded();

        let mut feed = self.inner.feed.lock();
        let replay = match resume {
            Some(after) => feed
                .log
                .iter()
                .filter(|(c, event)| c == collection && event.token > *after)
                .map(|(_, event)| event.clone())
                .collect(),
            None => VecDeque::new(),
        };
        feed.taps.push((collection.clone(), sender));

        Ok(Box::new(MemoryStream {
            replay,
            receiver,
            finished: None,
        }))
    }

    fn lookup(&self, collection: &CollectionId, key: &DocumentKey) -> Result<Option<Value>> {
        if self.inner.fail_lookups.load(Ordering::SeqCst) {
            return Err(RelayError::Lookup("injected lookup failure".to_string()));
        }
        Ok(self.get(collection, key))
    }
}

/// A stream over one collection's events: queued replay first, then live.
struct MemoryStream {
    replay: VecDeque<RawChangeEvent>,
    receiver: Receiver<StreamSignal>,
    finished: Option<Finished>,
}

enum Finished {
    End,
    Failed(String),
}

impl EventStream for MemoryStream {
    fn poll(&mut self, timeout: Duration) -> StreamItem {
        match &self.finished {
            Some(Finished::End) => return StreamItem::End,
            Some(Finished::Failed(msg)) => return StreamItem::Failed(msg.clone()),
            None => {}
        }

        if let Some(event) = self.replay.pop_front() {
            return StreamItem::Event(event);
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(StreamSignal::Event(event)) => StreamItem::Event(event),
            Ok(StreamSignal::Failed(msg)) => {
                self.finished = Some(Finished::Failed(msg.clone()));
                StreamItem::Failed(msg)
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => StreamItem::Quiet,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                self.finished = Some(Finished::End);
                StreamItem::End
            }
        }
    }
}
