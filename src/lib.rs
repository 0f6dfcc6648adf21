//! # sagastore
//!
//! Durable store for long-lived saga state in message-driven workflow hosts.
//!
//! Each saga instance persists correlated state across many messages, keyed
//! by a unique id, and survives concurrent updates from competing handlers:
//! a lost write race is reconciled field by field (keeping this handler's
//! changes and the concurrent writer's untouched fields) instead of failing
//! the operation or clobbering the record. Backends: Postgres (sqlx) and
//! in-memory.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod store;

pub use engine::{InMemoryEngine, PostgresEngine, StorageEngine};
pub use error::{Error, Result};
pub use model::{FieldMap, RecordImage, Saga, SagaId};
pub use store::SagaStore;
