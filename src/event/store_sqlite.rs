/*!
SQLite event store

Durable [`EventStore`] implementation backed by a SQLite database. One
append-only `events` table holds the serialized records; the causal context
columns are denormalized for indexed lookup by conversation and request id.

## Behavior

- Records are stored as JSON (`record_json`) exactly as serde emits them;
  deserialization on read is the only decoding step.
- The schema is bootstrapped on connect with `CREATE TABLE IF NOT EXISTS`;
  a single append-only table does not warrant embedded migrations.
- Insertion order is preserved through an autoincrement sequence column,
  which is what replay depends on.
*/

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::record::EventRecord;
use super::store::{EventStore, EventStoreError};

/// Environment variable naming the database URL for [`SqliteEventStore::from_env`].
pub const DATABASE_URL_VAR: &str = "TOPICFLOW_SQLITE_URL";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    at TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    request_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    record_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_conversation ON events(conversation_id, seq);
CREATE INDEX IF NOT EXISTS idx_events_request ON events(request_id, seq);
"#;

/// SQLite-backed event store.
///
/// # Examples
///
/// ```no_run
/// use topicflow::event::SqliteEventStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = SqliteEventStore::connect("sqlite://workflow.db").await?;
/// # Ok(())
/// # }
/// ```
pub struct SqliteEventStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventStore").finish()
    }
}

impl SqliteEventStore {
    /// Connect to (or create) a SQLite database at `database_url` and
    /// bootstrap the schema. Example URL: `"sqlite://workflow.db"`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, EventStoreError> {
        // SQLite refuses to open a missing file; create it up front the
        // same way the filesystem path would be prepared by a migration
        // runner.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }

        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("connect error: {e}"),
            })?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("schema bootstrap: {e}"),
            })?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect using `TOPICFLOW_SQLITE_URL` (via the environment or a
    /// `.env` file), defaulting to `sqlite://topicflow.db`.
    pub async fn from_env() -> Result<Self, EventStoreError> {
        dotenvy::dotenv().ok();
        let url = std::env::var(DATABASE_URL_VAR)
            .unwrap_or_else(|_| "sqlite://topicflow.db".to_string());
        Self::connect(&url).await
    }

    fn encode(record: &EventRecord) -> Result<String, EventStoreError> {
        serde_json::to_string(record).map_err(|source| EventStoreError::Serde { source })
    }

    fn decode_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<EventRecord>, EventStoreError> {
        rows.into_iter()
            .map(|row| {
                let json: String = row.get("record_json");
                serde_json::from_str(&json).map_err(|source| EventStoreError::Serde { source })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl EventStore for SqliteEventStore {
    #[instrument(skip(self, event), err)]
    async fn record_event(&self, event: EventRecord) -> Result<(), EventStoreError> {
        let record_json = Self::encode(&event)?;
        sqlx::query(
            r#"
            INSERT INTO events (id, at, conversation_id, request_id, run_id, record_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.at.to_rfc3339())
        .bind(&event.context.conversation_id)
        .bind(&event.context.request_id)
        .bind(&event.context.run_id)
        .bind(&record_json)
        .execute(&*self.pool)
        .await
        .map_err(|e| EventStoreError::Backend {
            message: format!("insert event: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self, events), err)]
    async fn record_events(&self, events: Vec<EventRecord>) -> Result<(), EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| EventStoreError::Backend {
            message: format!("tx begin: {e}"),
        })?;
        for event in &events {
            let record_json = Self::encode(event)?;
            sqlx::query(
                r#"
                INSERT INTO events (id, at, conversation_id, request_id, run_id, record_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(event.id.to_string())
            .bind(event.at.to_rfc3339())
            .bind(&event.context.conversation_id)
            .bind(&event.context.request_id)
            .bind(&event.context.run_id)
            .bind(&record_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("insert event: {e}"),
            })?;
        }
        tx.commit().await.map_err(|e| EventStoreError::Backend {
            message: format!("tx commit: {e}"),
        })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_events(&self) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query("SELECT record_json FROM events ORDER BY seq")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("select events: {e}"),
            })?;
        Self::decode_rows(rows)
    }

    #[instrument(skip(self), err)]
    async fn get_conversation_events(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query(
            "SELECT record_json FROM events WHERE conversation_id = ?1 ORDER BY seq",
        )
        .bind(conversation_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| EventStoreError::Backend {
            message: format!("select conversation events: {e}"),
        })?;
        Self::decode_rows(rows)
    }

    #[instrument(skip(self), err)]
    async fn get_request_events(
        &self,
        request_id: &str,
    ) -> Result<Vec<EventRecord>, EventStoreError> {
        let rows = sqlx::query("SELECT record_json FROM events WHERE request_id = ?1 ORDER BY seq")
            .bind(request_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("select request events: {e}"),
            })?;
        Self::decode_rows(rows)
    }

    #[instrument(skip(self), err)]
    async fn clear_events(&self) -> Result<(), EventStoreError> {
        sqlx::query("DELETE FROM events")
            .execute(&*self.pool)
            .await
            .map_err(|e| EventStoreError::Backend {
                message: format!("clear events: {e}"),
            })?;
        Ok(())
    }
}
