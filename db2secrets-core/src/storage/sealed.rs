//! Seal-wrapping storage decorator.
//!
//! Keys listed as sealed (by default the connection configuration, which
//! carries the bind password) are written as AES-GCM envelopes and opened
//! transparently on read. Other keys pass through untouched. A trailing `*`
//! in a sealed key pattern matches any key with that prefix.

use super::{Storage, StorageEntry, StorageError, StorageResult};
use crate::config::CONFIG_KEY;
use crate::security::encryption::{SealedValue, seal, unseal};
use async_trait::async_trait;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Storage wrapper that seals selected keys at rest.
pub struct SealedStorage {
    inner: Arc<dyn Storage>,
    passphrase: Arc<Zeroizing<String>>,
    sealed_keys: Vec<String>,
}

impl std::fmt::Debug for SealedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedStorage")
            .field("sealed_keys", &self.sealed_keys)
            .finish_non_exhaustive()
    }
}

impl SealedStorage {
    /// Wraps a storage backend, sealing the configuration key.
    pub fn new(inner: Arc<dyn Storage>, passphrase: Zeroizing<String>) -> Self {
        Self {
            inner,
            passphrase: Arc::new(passphrase),
            sealed_keys: vec![CONFIG_KEY.to_string()],
        }
    }

    /// Adds a key (or `prefix*` pattern) to the sealed set.
    pub fn with_sealed_key(mut self, pattern: impl Into<String>) -> Self {
        self.sealed_keys.push(pattern.into());
        self
    }

    /// Returns true if values under this key are sealed.
    pub fn is_sealed(&self, key: &str) -> bool {
        self.sealed_keys
            .iter()
            .any(|pattern| match pattern.strip_suffix('*') {
                Some(prefix) => key.starts_with(prefix),
                None => pattern == key,
            })
    }
}

fn seal_error(key: &str, reason: impl ToString) -> StorageError {
    StorageError::Seal {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Storage for SealedStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<StorageEntry>> {
        let Some(entry) = self.inner.get(key).await? else {
            return Ok(None);
        };
        if !self.is_sealed(key) {
            return Ok(Some(entry));
        }

        let sealed: SealedValue =
            serde_json::from_slice(&entry.value).map_err(|e| seal_error(key, e))?;
        let passphrase = Arc::clone(&self.passphrase);
        let storage_key = key.to_string();

        // Key derivation is CPU and memory heavy; keep it off the runtime threads.
        let plaintext = tokio::task::spawn_blocking(move || {
            unseal(&storage_key, &sealed, passphrase.as_str())
        })
        .await
        .map_err(|e| seal_error(key, e))?
        .map_err(|e| seal_error(key, e))?;

        Ok(Some(StorageEntry::new(key, plaintext.to_vec())))
    }

    async fn put(&self, entry: StorageEntry) -> StorageResult<()> {
        if !self.is_sealed(&entry.key) {
            return self.inner.put(entry).await;
        }

        let key = entry.key.clone();
        let passphrase = Arc::clone(&self.passphrase);
        let plaintext = Zeroizing::new(entry.value);
        let storage_key = key.clone();

        let sealed = tokio::task::spawn_blocking(move || {
            seal(&storage_key, &plaintext, passphrase.as_str())
        })
        .await
        .map_err(|e| seal_error(&key, e))?
        .map_err(|e| seal_error(&key, e))?;

        let value = serde_json::to_vec(&sealed).map_err(|e| seal_error(&key, e))?;
        tracing::debug!(key = %key, "Writing sealed storage entry");
        self.inner.put(StorageEntry::new(key, value)).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }
}
