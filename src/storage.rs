use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
};
use thiserror::Error;
use tokio::sync::RwLock;

/// Absence of a record (`NotFound`) is an expected outcome the
/// lifecycle layer matches on explicitly; everything else is a backend
/// failure and must not be mistaken for "no such record".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("store request failed: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Minimal keyed document store capability: point read/write/delete by
/// (id, partition key) plus an equality query over one document
/// attribute. Both the active and the archive tier are addressed
/// through this same interface, injected so tests can substitute an
/// in-memory fake.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, id: &str, partition_key: &str) -> Result<Value, StoreError>;

    /// Create-or-replace. The document carries its own `id` attribute.
    async fn upsert(&self, partition_key: &str, document: Value) -> Result<(), StoreError>;

    async fn delete(&self, id: &str, partition_key: &str) -> Result<(), StoreError>;

    /// All documents whose `attribute` equals `value`, unordered.
    async fn query_eq(&self, attribute: &str, value: &str) -> Result<Vec<Value>, StoreError>;
}

fn document_id(document: &Value) -> Result<String, StoreError> {
    document
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Backend("document is missing a string 'id' attribute".into()))
}

pub async fn connect(database_url: Option<String>) -> anyhow::Result<Pool<Sqlite>> {
    let url = match database_url {
        Some(u) => u,
        None => resolve_default_db_url()?,
    };
    let options = url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = Pool::<Sqlite>::connect_with(options).await?;
    // busy_timeout via PRAGMA
    sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
    Ok(pool)
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("sophia_gateway");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("sophia.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

/// One logical store (a named tier) over a shared SQLite pool.
/// Documents are stored as JSON text; predicate queries go through
/// `json_extract` so any document attribute is queryable.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: Pool<Sqlite>,
    store: String,
}

impl SqliteDocumentStore {
    pub async fn initialize(pool: &Pool<Sqlite>, store: &str) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (\
             store TEXT NOT NULL, \
             id TEXT NOT NULL, \
             partition_key TEXT NOT NULL, \
             body TEXT NOT NULL, \
             PRIMARY KEY (store, id, partition_key))",
        )
        .execute(pool)
        .await?;
        Ok(Self { pool: pool.clone(), store: store.to_string() })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn read(&self, id: &str, partition_key: &str) -> Result<Value, StoreError> {
        let row = sqlx::query(
            "SELECT body FROM documents WHERE store = ?1 AND id = ?2 AND partition_key = ?3",
        )
        .bind(&self.store)
        .bind(id)
        .bind(partition_key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Err(StoreError::NotFound) };
        let body: String = row.get("body");
        serde_json::from_str(&body).map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn upsert(&self, partition_key: &str, document: Value) -> Result<(), StoreError> {
        let id = document_id(&document)?;
        let body = document.to_string();
        sqlx::query(
            "INSERT INTO documents (store, id, partition_key, body) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (store, id, partition_key) DO UPDATE SET body = excluded.body",
        )
        .bind(&self.store)
        .bind(id)
        .bind(partition_key)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str, partition_key: &str) -> Result<(), StoreError> {
        let res = sqlx::query(
            "DELETE FROM documents WHERE store = ?1 AND id = ?2 AND partition_key = ?3",
        )
        .bind(&self.store)
        .bind(id)
        .bind(partition_key)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn query_eq(&self, attribute: &str, value: &str) -> Result<Vec<Value>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM documents WHERE store = ?1 AND json_extract(body, '$.' || ?2) = ?3",
        )
        .bind(&self.store)
        .bind(attribute)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let body: String = row.get("body");
                serde_json::from_str(&body).map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}

/// In-memory store, substituted for SQLite by the tests.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    docs: Arc<RwLock<HashMap<(String, String), Value>>>,
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read(&self, id: &str, partition_key: &str) -> Result<Value, StoreError> {
        let docs = self.docs.read().await;
        docs.get(&(id.to_string(), partition_key.to_string()))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn upsert(&self, partition_key: &str, document: Value) -> Result<(), StoreError> {
        let id = document_id(&document)?;
        let mut docs = self.docs.write().await;
        docs.insert((id, partition_key.to_string()), document);
        Ok(())
    }

    async fn delete(&self, id: &str, partition_key: &str) -> Result<(), StoreError> {
        let mut docs = self.docs.write().await;
        docs.remove(&(id.to_string(), partition_key.to_string()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn query_eq(&self, attribute: &str, value: &str) -> Result<Vec<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .values()
            .filter(|doc| doc.get(attribute).and_then(Value::as_str) == Some(value))
            .cloned()
            .collect())
    }
}
