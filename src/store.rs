//! Saga store: load/save/update/complete over saga records.
//!
//! A `SagaStore` is one logical unit of work. Records loaded or saved through
//! it are *attached*: the store keeps the field snapshot and version they
//! were loaded at, which is what makes no-op detection and conflict
//! reconciliation possible. Records obtained any other way are *detached*
//! and rejected on update/complete.
//!
//! The store is deliberately not shareable across concurrent callers — every
//! mutating operation takes `&mut self`. Hosts run one store per message
//! handling cycle; concurrency between handlers is resolved at the engine
//! via version checks, not here.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::engine::StorageEngine;
use crate::error::{Error, Result};
use crate::model::{FieldMap, Saga, SagaId, from_fields, to_fields};
use crate::reconcile;

/// What the session remembers about an attached record.
struct Tracked {
    /// Field values as of load (or last successful commit).
    original: FieldMap,
    /// Version the next commit must present to the engine.
    version: i64,
}

/// Store for saga records, scoped to one logical unit of work.
pub struct SagaStore<E: StorageEngine> {
    engine: E,
    tracked: HashMap<(&'static str, SagaId), Tracked>,
}

impl<E: StorageEngine> SagaStore<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            tracked: HashMap::new(),
        }
    }

    /// The underlying engine (for host wiring and tests).
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Whether this session is currently tracking the record.
    pub fn is_attached<S: Saga>(&self, saga: &S) -> bool {
        self.tracked.contains_key(&(S::COLLECTION, saga.id()))
    }

    /// Persist a new saga record and attach it.
    ///
    /// The id must already be set by the domain layer; the store never
    /// generates identifiers. Uniqueness is enforced by the engine.
    pub async fn save<S: Saga>(&mut self, saga: &S) -> Result<()> {
        self.require_collection::<S>().await?;
        let id = saga.id();
        if id.is_nil() {
            return Err(Error::Argument("saga id must not be nil".into()));
        }

        let fields = to_fields(saga)?;
        let version = self.engine.insert(S::COLLECTION, id, &fields).await?;
        self.attach::<S>(id, fields, version);
        info!(collection = S::COLLECTION, %id, "saga saved");
        Ok(())
    }

    /// Load a saga by id. `Ok(None)` when no record exists — absence is not
    /// an error. On a hit the record is attached to this session.
    pub async fn get<S: Saga>(&mut self, id: SagaId) -> Result<Option<S>> {
        self.require_collection::<S>().await?;
        if id.is_nil() {
            return Err(Error::Argument("saga id must not be nil".into()));
        }

        let Some(image) = self.engine.find_by_id(S::COLLECTION, id).await? else {
            return Ok(None);
        };
        let saga = from_fields(&image.fields)?;
        self.attach::<S>(image.id, image.fields, image.version);
        Ok(Some(saga))
    }

    /// Load the first saga whose named field equals `value`. Works for any
    /// field the saga type declares; the predicate is built at call time.
    pub async fn get_by<S: Saga>(
        &mut self,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Option<S>> {
        self.require_collection::<S>().await?;
        if field.is_empty() {
            return Err(Error::Argument("field name must not be empty".into()));
        }

        let Some(image) = self
            .engine
            .find_first_where(S::COLLECTION, field, value)
            .await?
        else {
            return Ok(None);
        };
        let saga = from_fields(&image.fields)?;
        self.attach::<S>(image.id, image.fields, image.version);
        Ok(Some(saga))
    }

    /// Commit a previously loaded saga's in-memory mutations.
    ///
    /// No pending mutations (current fields equal the loaded snapshot) is a
    /// validation-only no-op: the engine is not touched. A commit that loses
    /// the race to a concurrent writer is reconciled field-by-field (see
    /// [`reconcile`]) and retried exactly once; `saga` is rewritten in place
    /// with the merged state. Any other failure, including a second
    /// conflict, propagates unchanged.
    pub async fn update<S: Saga>(&mut self, saga: &mut S) -> Result<()> {
        self.require_collection::<S>().await?;
        let id = saga.id();
        let entry = self
            .tracked
            .get(&(S::COLLECTION, id))
            .ok_or(Error::DetachedUpdate(id))?;

        let current = to_fields(saga)?;
        let changes = reconcile::change_set(&entry.original, &current);
        if changes.is_empty() {
            debug!(collection = S::COLLECTION, %id, "update with no pending changes, skipping commit");
            return Ok(());
        }

        match self
            .engine
            .update(S::COLLECTION, id, &current, entry.version)
            .await
        {
            Ok(version) => {
                self.attach::<S>(id, current, version);
                info!(collection = S::COLLECTION, %id, version, "saga updated");
                Ok(())
            }
            Err(Error::Conflict { .. }) => self.reconcile_and_retry(saga, changes).await,
            Err(e) => Err(e),
        }
    }

    /// Logically delete a saga record.
    ///
    /// Reloads the persisted state first so the delete is issued against the
    /// current version — deleting from a stale in-memory image would trip a
    /// spurious concurrency conflict.
    pub async fn complete<S: Saga>(&mut self, saga: &S) -> Result<()> {
        self.require_collection::<S>().await?;
        let id = saga.id();
        if !self.tracked.contains_key(&(S::COLLECTION, id)) {
            return Err(Error::DetachedComplete(id));
        }

        let fresh = self.engine.reload(S::COLLECTION, id).await?;
        self.engine
            .mark_deleted(S::COLLECTION, id, fresh.version)
            .await?;
        self.tracked.remove(&(S::COLLECTION, id));
        info!(collection = S::COLLECTION, %id, "saga completed");
        Ok(())
    }

    /// Lost the write race: merge and retry once.
    ///
    /// `changes` is what this operation intended: the diff of current fields
    /// vs the loaded snapshot, computed before anything is discarded. The
    /// fresh reload is the concurrent writer's committed state; reapplying
    /// the change set on top of it keeps both writers' work, with this
    /// writer winning any field both touched.
    async fn reconcile_and_retry<S: Saga>(&mut self, saga: &mut S, changes: FieldMap) -> Result<()> {
        let id = saga.id();
        let fresh = self.engine.reload(S::COLLECTION, id).await?;
        let merged = reconcile::merge(&fresh.fields, &changes);

        debug!(
            collection = S::COLLECTION,
            %id,
            contested_fields = changes.len(),
            fresh_version = fresh.version,
            "reconciling concurrent update"
        );

        // The merge may collapse to the fresh state (every intended change
        // already present); committing that would be a no-op write.
        let version = if merged == fresh.fields {
            fresh.version
        } else {
            self.engine
                .update(S::COLLECTION, id, &merged, fresh.version)
                .await?
        };

        *saga = from_fields(&merged)?;
        self.attach::<S>(id, merged, version);
        info!(collection = S::COLLECTION, %id, version, "saga updated after reconciliation");
        Ok(())
    }

    async fn require_collection<S: Saga>(&self) -> Result<()> {
        if self.engine.has_collection(S::COLLECTION).await? {
            Ok(())
        } else {
            Err(Error::MissingCollection(S::COLLECTION.to_string()))
        }
    }

    fn attach<S: Saga>(&mut self, id: SagaId, original: FieldMap, version: i64) {
        self.tracked
            .insert((S::COLLECTION, id), Tracked { original, version });
    }
}
