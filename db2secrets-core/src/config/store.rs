//! JSON persistence of the connection configuration.

use super::{CONFIG_KEY, ConnectionConfig};
use crate::Result;
use crate::storage::{Storage, StorageEntry};
use std::sync::Arc;

/// Reads and writes the single [`ConnectionConfig`] record.
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("key", &CONFIG_KEY)
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Creates a store over the given storage collaborator.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Reads the configuration; `None` if it has never been written.
    ///
    /// # Errors
    /// Returns `Storage` for collaborator failures and `Serialization` if the
    /// stored record is malformed or fails validation.
    pub async fn read(&self) -> Result<Option<ConnectionConfig>> {
        let Some(entry) = self.storage.get(CONFIG_KEY).await? else {
            return Ok(None);
        };
        entry.decode_json().map(Some)
    }

    /// Validates and replaces the stored configuration with a single put.
    ///
    /// # Errors
    /// Returns `Validation` for invalid records; nothing is written then.
    pub async fn write(&self, config: &ConnectionConfig) -> Result<()> {
        config.validate()?;
        let entry = StorageEntry::json(CONFIG_KEY, config)?;
        self.storage.put(entry).await?;
        tracing::debug!(config = %config, "Connection configuration written");
        Ok(())
    }

    /// Returns true if a configuration record exists.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.storage.get(CONFIG_KEY).await?.is_some())
    }
}
