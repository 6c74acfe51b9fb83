//! Process-local storage.

use super::{Storage, StorageEntry, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory storage backed by a `HashMap`.
///
/// Each operation holds the map lock for its duration, which makes every
/// put atomic per key.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<StorageEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .map(|value| StorageEntry::new(key, value.clone())))
    }

    async fn put(&self, entry: StorageEntry) -> StorageResult<()> {
        self.entries.write().await.insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_replace() {
        let storage = InMemoryStorage::new();
        assert!(storage.is_empty().await);

        storage
            .put(StorageEntry::new("config", b"first".to_vec()))
            .await
            .unwrap();
        storage
            .put(StorageEntry::new("config", b"second".to_vec()))
            .await
            .unwrap();

        let entry = storage.get("config").await.unwrap().unwrap();
        assert_eq!(entry.value, b"second");
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let storage = InMemoryStorage::new();
        storage.delete("config").await.unwrap();
        assert!(storage.get("config").await.unwrap().is_none());
    }
}
