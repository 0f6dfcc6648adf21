//! Error types for sagastore.

use thiserror::Error;

use crate::model::SagaId;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an invalid input: nil id, empty field name.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The saga type has no configured backing collection.
    /// A configuration defect, not a data condition.
    #[error("no backing collection configured for saga type '{0}'")]
    MissingCollection(String),

    /// Update attempted on a record this store session is not tracking.
    #[error("cannot update detached saga {0}: record was not loaded through this store")]
    DetachedUpdate(SagaId),

    /// Complete attempted on a record this store session is not tracking.
    #[error("cannot complete detached saga {0}: record was not loaded through this store")]
    DetachedComplete(SagaId),

    /// Optimistic concurrency conflict: another writer committed a different
    /// version of the record since it was loaded. `SagaStore::update` handles
    /// this internally (one reconciliation + retry); it surfaces only when
    /// the retried commit conflicts again.
    #[error("concurrency conflict on saga {id} in '{collection}': expected version {expected}")]
    Conflict {
        collection: String,
        id: SagaId,
        expected: i64,
    },

    /// A record expected to exist is gone (e.g. deleted by a concurrent
    /// writer between conflict detection and reload).
    #[error("saga record not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("saga (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
