//! In-memory storage engine.
//!
//! Backs tests and single-instance deployments. Rows live in a mutex'd map
//! with the same version discipline as the Postgres engine, so the store's
//! conflict handling exercises identically against both. Keeps an operation
//! log so tests can assert which primitives ran and in what order.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{FieldMap, RecordImage, SagaId};

use super::StorageEngine;

#[derive(Debug, Clone)]
struct Row {
    fields: FieldMap,
    version: i64,
    deleted: bool,
}

/// In-memory engine. Not durable.
#[derive(Default)]
pub struct InMemoryEngine {
    collections: Mutex<HashSet<String>>,
    rows: Mutex<HashMap<(String, SagaId), Row>>,
    ops: Mutex<Vec<String>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style collection registration for test setup.
    pub fn with_collection(self, name: &str) -> Self {
        self.register_collection(name);
        self
    }

    /// Configure a backing collection. Saga types whose collection was never
    /// registered fail every store operation with `MissingCollection`.
    pub fn register_collection(&self, name: &str) {
        self.lock(&self.collections).insert(name.to_string());
    }

    /// Commit a record image directly, bypassing store tracking. This is the
    /// "concurrent writer" half of conflict tests; it bumps the version like
    /// any other committed write.
    pub fn commit_raw(&self, collection: &str, id: SagaId, fields: FieldMap) {
        let mut rows = self.lock(&self.rows);
        match rows.get_mut(&(collection.to_string(), id)) {
            Some(row) => {
                row.fields = fields;
                row.version += 1;
            }
            None => {
                rows.insert(
                    (collection.to_string(), id),
                    Row {
                        fields,
                        version: 1,
                        deleted: false,
                    },
                );
            }
        }
    }

    /// Names of the write/read primitives executed so far, in order.
    pub fn ops(&self) -> Vec<String> {
        self.lock(&self.ops).clone()
    }

    /// How many committing writes (insert/update/mark_deleted) have run.
    pub fn commit_count(&self) -> usize {
        self.lock(&self.ops)
            .iter()
            .filter(|op| op.starts_with("insert") || op.starts_with("update") || op.starts_with("mark_deleted"))
            .count()
    }

    fn lock<'a, T>(&'a self, m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_op(&self, op: String) {
        self.lock(&self.ops).push(op);
    }

    fn key(collection: &str, id: SagaId) -> (String, SagaId) {
        (collection.to_string(), id)
    }
}

#[async_trait]
impl StorageEngine for InMemoryEngine {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.lock(&self.collections).contains(collection))
    }

    async fn find_by_id(&self, collection: &str, id: SagaId) -> Result<Option<RecordImage>> {
        self.record_op(format!("find_by_id {collection}/{id}"));
        let rows = self.lock(&self.rows);
        Ok(rows
            .get(&Self::key(collection, id))
            .filter(|row| !row.deleted)
            .map(|row| RecordImage {
                id,
                fields: row.fields.clone(),
                version: row.version,
            }))
    }

    async fn find_first_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordImage>> {
        self.record_op(format!("find_first_where {collection}.{field}"));
        let rows = self.lock(&self.rows);
        Ok(rows
            .iter()
            .filter(|((coll, _), row)| coll == collection && !row.deleted)
            .find(|(_, row)| row.fields.get(field) == Some(value))
            .map(|((_, id), row)| RecordImage {
                id: *id,
                fields: row.fields.clone(),
                version: row.version,
            }))
    }

    async fn insert(&self, collection: &str, id: SagaId, fields: &FieldMap) -> Result<i64> {
        self.record_op(format!("insert {collection}/{id}"));
        let mut rows = self.lock(&self.rows);
        if rows.contains_key(&Self::key(collection, id)) {
            return Err(Error::Other(format!(
                "duplicate saga id {id} in '{collection}'"
            )));
        }
        rows.insert(
            Self::key(collection, id),
            Row {
                fields: fields.clone(),
                version: 1,
                deleted: false,
            },
        );
        Ok(1)
    }

    async fn update(
        &self,
        collection: &str,
        id: SagaId,
        fields: &FieldMap,
        expected_version: i64,
    ) -> Result<i64> {
        self.record_op(format!("update {collection}/{id} v{expected_version}"));
        let mut rows = self.lock(&self.rows);
        let row = rows
            .get_mut(&Self::key(collection, id))
            .filter(|row| !row.deleted)
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        if row.version != expected_version {
            return Err(Error::Conflict {
                collection: collection.to_string(),
                id,
                expected: expected_version,
            });
        }
        row.fields = fields.clone();
        row.version += 1;
        Ok(row.version)
    }

    async fn mark_deleted(
        &self,
        collection: &str,
        id: SagaId,
        expected_version: i64,
    ) -> Result<()> {
        self.record_op(format!("mark_deleted {collection}/{id} v{expected_version}"));
        let mut rows = self.lock(&self.rows);
        let row = rows
            .get_mut(&Self::key(collection, id))
            .filter(|row| !row.deleted)
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))?;
        if row.version != expected_version {
            return Err(Error::Conflict {
                collection: collection.to_string(),
                id,
                expected: expected_version,
            });
        }
        row.deleted = true;
        Ok(())
    }

    async fn reload(&self, collection: &str, id: SagaId) -> Result<RecordImage> {
        self.record_op(format!("reload {collection}/{id}"));
        let rows = self.lock(&self.rows);
        rows.get(&Self::key(collection, id))
            .filter(|row| !row.deleted)
            .map(|row| RecordImage {
                id,
                fields: row.fields.clone(),
                version: row.version,
            })
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))
    }
}
