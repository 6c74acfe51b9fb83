//! Durable key-value storage abstraction.
//!
//! The backend persists its configuration through a [`Storage`]
//! implementation: get and put by key, atomic per key, no multi-key
//! transactions. Values are opaque bytes; records are JSON-encoded through
//! [`StorageEntry::json`].
//!
//! # Module Structure
//! - `memory`: Process-local map, used by tests and the `memory:` URL
//! - `sqlite`: SQLite-backed store via `sqlx` (feature `sqlite`)
//! - `sealed`: Decorator sealing selected keys with AES-GCM (feature `encryption`)

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "encryption")]
pub mod sealed;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "encryption")]
pub use sealed::SealedStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Failure of the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite query or connection failure
    #[cfg(feature = "sqlite")]
    #[error("Storage I/O failed: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// A sealed entry could not be sealed or opened
    #[cfg(feature = "encryption")]
    #[error("Sealed storage entry '{key}' could not be processed: {reason}")]
    Seal { key: String, reason: String },

    /// The backend cannot serve requests
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A single stored value.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageEntry {
    /// Storage key
    pub key: String,
    /// Raw value bytes
    pub value: Vec<u8>,
}

impl std::fmt::Debug for StorageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Values may hold credentials.
        f.debug_struct("StorageEntry")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .finish()
    }
}

impl StorageEntry {
    /// Creates an entry from raw bytes.
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Creates an entry holding the JSON encoding of a record.
    pub fn json<T: Serialize>(key: impl Into<String>, record: &T) -> crate::Result<Self> {
        let key = key.into();
        let value = serde_json::to_vec(record).map_err(|e| {
            crate::SecretsError::serialization(format!("encoding storage entry '{}'", key), e)
        })?;
        Ok(Self { key, value })
    }

    /// Decodes the entry's JSON value into a record.
    pub fn decode_json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.value).map_err(|e| {
            crate::SecretsError::serialization(format!("decoding storage entry '{}'", self.key), e)
        })
    }
}

/// Key-value storage consumed by the backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads an entry; `None` if the key has never been written.
    async fn get(&self, key: &str) -> StorageResult<Option<StorageEntry>>;

    /// Writes an entry, replacing any previous value atomically.
    async fn put(&self, entry: StorageEntry) -> StorageResult<()>;

    /// Deletes an entry; deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Opens a storage backend from a URL.
///
/// Supported forms: `memory:` and, with the `sqlite` feature,
/// `sqlite://path/to/file.db` or `sqlite::memory:`.
///
/// # Errors
/// Returns `UnsupportedFeature` for schemes not compiled into this build and
/// `Storage` if the backend cannot be opened.
pub async fn open_storage(url: &str) -> crate::Result<Arc<dyn Storage>> {
    if url == "memory:" || url == "memory" {
        return Ok(Arc::new(InMemoryStorage::new()));
    }

    if url.starts_with("sqlite:") {
        #[cfg(feature = "sqlite")]
        {
            let storage = SqliteStorage::connect(url).await?;
            return Ok(Arc::new(storage));
        }
        #[cfg(not(feature = "sqlite"))]
        {
            return Err(crate::SecretsError::unsupported_feature(
                "SQLite storage",
                "Compile with --features sqlite to enable SQLite storage",
            ));
        }
    }

    Err(crate::SecretsError::configuration(format!(
        "Unsupported storage URL scheme in '{}' (expected memory: or sqlite:)",
        url
    )))
}
