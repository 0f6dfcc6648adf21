//! Storage engine contract and backends.
//!
//! The engine owns the canonical persisted copy of every saga record and
//! exposes CRUD primitives over (collection, id, fields, version) tuples.
//! Each write primitive commits on its own and carries the expected version;
//! a mismatch is reported as [`Error::Conflict`](crate::error::Error), the
//! one failure the store treats specially. The store layers attachment
//! tracking and conflict reconciliation on top.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{FieldMap, RecordImage, SagaId};

pub use memory::InMemoryEngine;
pub use postgres::PostgresEngine;

/// CRUD primitives a saga storage backend must provide.
///
/// Implementations must be safe to share across stores (`Send + Sync`);
/// serialization of operations on a single record is the caller's problem,
/// version checks are the engine's.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Whether a backing collection is configured for this name.
    /// Absence is a configuration defect the store surfaces per operation.
    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Look up a record by id. `Ok(None)` when absent or logically deleted.
    async fn find_by_id(&self, collection: &str, id: SagaId) -> Result<Option<RecordImage>>;

    /// First record whose named field equals `value`. The predicate is built
    /// dynamically against the field name, so any field a saga type declares
    /// is queryable.
    async fn find_first_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordImage>>;

    /// Insert a new record and commit. Returns the initial version.
    /// Duplicate ids surface as a storage error (uniqueness is enforced here).
    async fn insert(&self, collection: &str, id: SagaId, fields: &FieldMap) -> Result<i64>;

    /// Overwrite a record's fields and commit, iff its persisted version
    /// still equals `expected_version`. Returns the new version. Fails with
    /// `Error::Conflict` when another writer got there first.
    async fn update(
        &self,
        collection: &str,
        id: SagaId,
        fields: &FieldMap,
        expected_version: i64,
    ) -> Result<i64>;

    /// Logically delete a record and commit, with the same version check as
    /// `update`. Deleted records are invisible to finds and reloads.
    async fn mark_deleted(&self, collection: &str, id: SagaId, expected_version: i64)
    -> Result<()>;

    /// Re-read the currently persisted image of a record, discarding nothing
    /// on the engine side. `NotFound` if the record is gone.
    async fn reload(&self, collection: &str, id: SagaId) -> Result<RecordImage>;
}

// Engines are typically shared: one engine handle, one store per unit of work.
#[async_trait]
impl<T: StorageEngine + ?Sized> StorageEngine for std::sync::Arc<T> {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        (**self).has_collection(collection).await
    }

    async fn find_by_id(&self, collection: &str, id: SagaId) -> Result<Option<RecordImage>> {
        (**self).find_by_id(collection, id).await
    }

    async fn find_first_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordImage>> {
        (**self).find_first_where(collection, field, value).await
    }

    async fn insert(&self, collection: &str, id: SagaId, fields: &FieldMap) -> Result<i64> {
        (**self).insert(collection, id, fields).await
    }

    async fn update(
        &self,
        collection: &str,
        id: SagaId,
        fields: &FieldMap,
        expected_version: i64,
    ) -> Result<i64> {
        (**self).update(collection, id, fields, expected_version).await
    }

    async fn mark_deleted(
        &self,
        collection: &str,
        id: SagaId,
        expected_version: i64,
    ) -> Result<()> {
        (**self).mark_deleted(collection, id, expected_version).await
    }

    async fn reload(&self, collection: &str, id: SagaId) -> Result<RecordImage> {
        (**self).reload(collection, id).await
    }
}
