//! Core data model.
//!
//! A saga is a durable, identifiable unit of workflow state, correlated
//! across multiple asynchronous messages. The store persists each saga as a
//! set of named fields (its serde serialization) plus a version counter used
//! for optimistic concurrency. The store never interprets field values; it
//! only compares and copies them.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Saga contract
// ---------------------------------------------------------------------------

/// Contract every persistable saga type implements.
///
/// `COLLECTION` is the declared-type tag: it names the backing collection the
/// type maps to, and is resolved statically — the store never inspects a
/// record's runtime type to find its collection. Whether a collection is
/// actually configured is checked against the storage engine per operation.
pub trait Saga: Serialize + DeserializeOwned + Send {
    /// Backing collection this saga type persists to.
    const COLLECTION: &'static str;

    /// Unique identifier. Immutable once assigned; the caller/domain layer
    /// sets it before the first save — the store never generates ids.
    fn id(&self) -> SagaId;
}

// ---------------------------------------------------------------------------
// SagaId
// ---------------------------------------------------------------------------

/// Newtype for saga identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(pub Uuid);

impl SagaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The zero value. Not a valid identifier for any store operation.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SagaId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Field maps
// ---------------------------------------------------------------------------

/// A saga record flattened to its named fields.
///
/// This is the unit the store snapshots at load time and diffs at write time;
/// conflict reconciliation merges two of these field by field.
pub type FieldMap = serde_json::Map<String, Value>;

/// Serialize a saga to its field map. Saga types must serialize to a JSON
/// object — named fields are what the store diffs and merges.
pub fn to_fields<S: Saga>(saga: &S) -> Result<FieldMap> {
    match serde_json::to_value(saga)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Other(format!(
            "saga type '{}' must serialize to an object, got {other}",
            S::COLLECTION
        ))),
    }
}

/// Rebuild a saga from its field map.
pub fn from_fields<S: Saga>(fields: &FieldMap) -> Result<S> {
    Ok(serde_json::from_value(Value::Object(fields.clone()))?)
}

// ---------------------------------------------------------------------------
// RecordImage
// ---------------------------------------------------------------------------

/// A persisted record as the storage engine hands it back: fields plus the
/// version token the engine checks on the next commit.
#[derive(Debug, Clone)]
pub struct RecordImage {
    pub id: SagaId,
    pub fields: FieldMap,
    pub version: i64,
}
