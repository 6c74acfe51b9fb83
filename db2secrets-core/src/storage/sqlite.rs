//! SQLite-backed storage.
//!
//! # Security Features
//! - One row per key; every put is a single upsert statement
//! - Values are stored as opaque blobs (seal them with `SealedStorage`)
//! - Database paths are never included in error messages

use super::{Storage, StorageEntry, StorageResult};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS secrets_storage (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
)";

/// Storage persisted in a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (creating if missing) the database at the given URL.
    ///
    /// # Arguments
    /// * `url` - `sqlite://path/to/file.db` or `sqlite::memory:`
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the database cannot be opened
    pub async fn connect(url: &str) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own copy.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the storage table if needed.
    pub async fn from_pool(pool: SqlitePool) -> StorageResult<Self> {
        sqlx::query(CREATE_TABLE).execute(&pool).await?;
        tracing::debug!("SQLite storage table ready");
        Ok(Self { pool })
    }

    /// Closes the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<StorageEntry>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT value FROM secrets_storage WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value.map(|value| StorageEntry::new(key, value)))
    }

    async fn put(&self, entry: StorageEntry) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO secrets_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(entry.key)
        .bind(entry.value)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM secrets_storage WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
