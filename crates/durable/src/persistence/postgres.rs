//! PostgreSQL implementation of HistoryStore
//!
//! Production persistence using PostgreSQL with:
//! - One transaction per append, serialized by a row lock on the instance
//! - Optimistic concurrency control via `next_sequence`
//! - A `terminated` flag so closed histories reject further appends

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::workflow::HistoryEvent;

/// PostgreSQL implementation of HistoryStore
///
/// # Example
///
/// ```ignore
/// use orchestra_durable::PostgresHistoryStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/orchestra").await?;
/// let store = PostgresHistoryStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    error!(error = %err, "history store query failed");
    StoreError::Unavailable(err.to_string())
}

fn decode(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn instance_from_row(row: &PgRow) -> Result<InstanceInfo, StoreError> {
    Ok(InstanceInfo {
        id: row.try_get("id").map_err(decode)?,
        definition: row.try_get("definition").map_err(decode)?,
        input: row.try_get("input").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn record_from_row(row: &PgRow) -> Result<HistoryRecord, StoreError> {
    let data: Value = row.try_get("event_data").map_err(decode)?;
    Ok(HistoryRecord {
        sequence: row.try_get("sequence_num").map_err(decode)?,
        recorded_at: row.try_get("recorded_at").map_err(decode)?,
        event: serde_json::from_value(data).map_err(|e| StoreError::Serialization(e.to_string()))?,
    })
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    #[instrument(skip(self, input))]
    async fn create_instance(
        &self,
        id: Uuid,
        definition: &str,
        input: Value,
    ) -> Result<InstanceInfo, StoreError> {
        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO workflow_instances (id, definition, input)
            VALUES ($1, $2, $3)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(definition)
        .bind(&input)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.code().as_deref() == Some("23505") {
                    return StoreError::AlreadyExists(id);
                }
            }
            unavailable(e)
        })?;

        debug!(instance_id = %id, definition, "created workflow instance");
        Ok(InstanceInfo {
            id,
            definition: definition.to_string(),
            input,
            created_at,
        })
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, id: Uuid) -> Result<InstanceInfo, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, definition, input, created_at
            FROM workflow_instances
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or(StoreError::InstanceNotFound(id))?;

        instance_from_row(&row)
    }

    #[instrument(skip(self, event), fields(event_type = event.type_name()))]
    async fn append(
        &self,
        id: Uuid,
        expected_sequence: i64,
        event: HistoryEvent,
    ) -> Result<HistoryRecord, StoreError> {
        let event_data =
            serde_json::to_value(&event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let row = sqlx::query(
            r#"
            SELECT next_sequence, terminated
            FROM workflow_instances
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unavailable)?
        .ok_or(StoreError::InstanceNotFound(id))?;

        let current: i64 = row.try_get("next_sequence").map_err(decode)?;
        let terminated: bool = row.try_get("terminated").map_err(decode)?;

        if current != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current,
            });
        }
        if terminated {
            return Err(StoreError::Terminated(id));
        }

        let recorded_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO workflow_history (instance_id, sequence_num, event_type, event_data)
            VALUES ($1, $2, $3, $4)
            RETURNING recorded_at
            "#,
        )
        .bind(id)
        .bind(current)
        .bind(event.type_name())
        .bind(&event_data)
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;

        sqlx::query(
            r#"
            UPDATE workflow_instances
            SET next_sequence = $2, terminated = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(current + 1)
        .bind(event.is_terminal())
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        debug!(instance_id = %id, sequence = current, "appended history event");
        Ok(HistoryRecord {
            sequence: current,
            recorded_at,
            event,
        })
    }

    #[instrument(skip(self))]
    async fn read_all(&self, id: Uuid) -> Result<Vec<HistoryRecord>, StoreError> {
        // The existence check and the history read share one snapshot
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM workflow_instances WHERE id = $1)")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .map_err(unavailable)?;
        if !exists {
            return Err(StoreError::InstanceNotFound(id));
        }

        let rows = sqlx::query(
            r#"
            SELECT sequence_num, event_data, recorded_at
            FROM workflow_history
            WHERE instance_id = $1
            ORDER BY sequence_num ASC
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn list_unfinished(&self) -> Result<Vec<InstanceInfo>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, definition, input, created_at
            FROM workflow_instances
            WHERE NOT terminated
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(instance_from_row).collect()
    }
}
