//! Postgres storage engine.
//!
//! One JSONB row per saga record, keyed by (collection, id), with a version
//! column for optimistic concurrency. Writes are version-checked UPDATEs;
//! zero rows affected with a live row present means another writer committed
//! first. Collections are configuration, registered in their own table.

use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::{FieldMap, RecordImage, SagaId};

use super::StorageEngine;

/// Postgres engine. Owns the connection pool.
pub struct PostgresEngine {
    pool: PgPool,
}

impl PostgresEngine {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check — run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Configure a backing collection. Idempotent; meant to run at host
    /// startup alongside saga type registration.
    pub async fn register_collection(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO saga_collections (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch the live version of a record, deleted rows excluded.
    async fn live_version(&self, collection: &str, id: SagaId) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM saga_records
             WHERE collection = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(collection)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}

#[async_trait]
impl StorageEngine for PostgresEngine {
    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT name FROM saga_collections WHERE name = $1")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn find_by_id(&self, collection: &str, id: SagaId) -> Result<Option<RecordImage>> {
        let row: Option<SagaRow> = sqlx::query_as(
            "SELECT id, fields, version FROM saga_records
             WHERE collection = $1 AND id = $2 AND deleted_at IS NULL",
        )
        .bind(collection)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SagaRow::try_into_image).transpose()
    }

    async fn find_first_where(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<RecordImage>> {
        // Equality against an arbitrary named field, constructed dynamically
        // via jsonb extraction rather than per-saga SQL.
        let row: Option<SagaRow> = sqlx::query_as(
            "SELECT id, fields, version FROM saga_records
             WHERE collection = $1 AND deleted_at IS NULL AND fields -> $2 = $3
             LIMIT 1",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SagaRow::try_into_image).transpose()
    }

    async fn insert(&self, collection: &str, id: SagaId, fields: &FieldMap) -> Result<i64> {
        let now = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO saga_records (collection, id, fields, version, created_at, updated_at)
             VALUES ($1, $2, $3, 1, $4, $4)",
        )
        .bind(collection)
        .bind(id.0)
        .bind(Value::Object(fields.clone()))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(1)
    }

    async fn update(
        &self,
        collection: &str,
        id: SagaId,
        fields: &FieldMap,
        expected_version: i64,
    ) -> Result<i64> {
        let new_version: Option<(i64,)> = sqlx::query_as(
            "UPDATE saga_records
             SET fields = $1, version = version + 1, updated_at = now()
             WHERE collection = $2 AND id = $3 AND version = $4 AND deleted_at IS NULL
             RETURNING version",
        )
        .bind(Value::Object(fields.clone()))
        .bind(collection)
        .bind(id.0)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match new_version {
            Some((v,)) => Ok(v),
            // No row updated: distinguish a version race from a vanished record.
            None => match self.live_version(collection, id).await? {
                Some(_) => Err(Error::Conflict {
                    collection: collection.to_string(),
                    id,
                    expected: expected_version,
                }),
                None => Err(Error::NotFound(format!("{collection}/{id}"))),
            },
        }
    }

    async fn mark_deleted(
        &self,
        collection: &str,
        id: SagaId,
        expected_version: i64,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE saga_records
             SET deleted_at = now(), updated_at = now()
             WHERE collection = $1 AND id = $2 AND version = $3 AND deleted_at IS NULL",
        )
        .bind(collection)
        .bind(id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return match self.live_version(collection, id).await? {
                Some(_) => Err(Error::Conflict {
                    collection: collection.to_string(),
                    id,
                    expected: expected_version,
                }),
                None => Err(Error::NotFound(format!("{collection}/{id}"))),
            };
        }
        Ok(())
    }

    async fn reload(&self, collection: &str, id: SagaId) -> Result<RecordImage> {
        self.find_by_id(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{collection}/{id}")))
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SagaRow {
    id: Uuid,
    fields: Value,
    version: i64,
}

impl SagaRow {
    fn try_into_image(self) -> Result<RecordImage> {
        let fields = match self.fields {
            Value::Object(map) => map,
            other => {
                return Err(Error::Other(format!(
                    "saga record {} holds non-object fields: {other}",
                    self.id
                )));
            }
        };
        Ok(RecordImage {
            id: SagaId(self.id),
            fields,
            version: self.version,
        })
    }
}
