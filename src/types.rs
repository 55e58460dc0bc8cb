//! Core types for the change-feed pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of the logical collection a change applies to.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub String);

impl CollectionId {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionId(name.into())
    }
}

impl fmt::Debug for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionId({})", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a document, unique within its collection.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentKey(pub String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Self {
        DocumentKey(key.into())
    }
}

impl fmt::Debug for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentKey({})", self.0)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque position in the upstream feed.
///
/// Totally ordered per feed instance, never reused, and never exposed to
/// clients. Its only use is resuming a subscription after reconnect.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceToken(pub Vec<u8>);

impl SequenceToken {
    /// Encode a numeric feed position (big-endian, so byte order matches
    /// numeric order).
    pub fn from_position(position: u64) -> Self {
        SequenceToken(position.to_be_bytes().to_vec())
    }
}

impl fmt::Debug for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceToken({} bytes)", self.0.len())
    }
}

/// The kind of mutation a change record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Replace,
    Delete,
    /// The upstream collection was dropped or renamed; the feed ends after
    /// this record.
    Invalidate,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeOperation::Insert => "insert",
            ChangeOperation::Update => "update",
            ChangeOperation::Replace => "replace",
            ChangeOperation::Delete => "delete",
            ChangeOperation::Invalidate => "invalidate",
        };
        write!(f, "{}", s)
    }
}

/// Sparse description of what an update touched.
///
/// Supplementary to `full_document`, never a substitute for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangedFields {
    /// Fields added or modified, with their new values.
    pub updated: serde_json::Map<String, Value>,

    /// Fields removed from the document.
    pub removed: Vec<String>,
}

impl ChangedFields {
    pub fn updated(fields: serde_json::Map<String, Value>) -> Self {
        Self {
            updated: fields,
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Canonical change record: the unit forwarded through the pipeline.
///
/// Constructed once per upstream event, immutable, discarded after fan-out.
/// `full_document`, when present, is the post-operation state of the
/// document, not the state at emission time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// What happened.
    pub operation: ChangeOperation,

    /// Which collection it happened in.
    pub collection: CollectionId,

    /// Which document was affected.
    pub document_key: DocumentKey,

    /// Complete current document state. Present for insert/update/replace
    /// when obtainable, absent for delete and invalidate.
    pub full_document: Option<Value>,

    /// Present only for update.
    pub changed_fields: Option<ChangedFields>,

    /// Resume position of this event in the upstream feed.
    pub sequence_token: SequenceToken,
}

impl ChangeRecord {
    pub fn insert(
        collection: CollectionId,
        document_key: DocumentKey,
        document: Value,
        token: SequenceToken,
    ) -> Self {
        Self {
            operation: ChangeOperation::Insert,
            collection,
            document_key,
            full_document: Some(document),
            changed_fields: None,
            sequence_token: token,
        }
    }

    pub fn update(
        collection: CollectionId,
        document_key: DocumentKey,
        full_document: Option<Value>,
        changed_fields: Option<ChangedFields>,
        token: SequenceToken,
    ) -> Self {
        Self {
            operation: ChangeOperation::Update,
            collection,
            document_key,
            full_document,
            changed_fields,
            sequence_token: token,
        }
    }

    pub fn replace(
        collection: CollectionId,
        document_key: DocumentKey,
        document: Value,
        token: SequenceToken,
    ) -> Self {
        Self {
            operation: ChangeOperation::Replace,
            collection,
            document_key,
            full_document: Some(document),
            changed_fields: None,
            sequence_token: token,
        }
    }

    pub fn delete(collection: CollectionId, document_key: DocumentKey, token: SequenceToken) -> Self {
        Self {
            operation: ChangeOperation::Delete,
            collection,
            document_key,
            full_document: None,
            changed_fields: None,
            sequence_token: token,
        }
    }

    pub fn invalidate(collection: CollectionId, token: SequenceToken) -> Self {
        Self {
            operation: ChangeOperation::Invalidate,
            collection,
            document_key: DocumentKey::new(""),
            full_document: None,
            changed_fields: None,
            sequence_token: token,
        }
    }
}
