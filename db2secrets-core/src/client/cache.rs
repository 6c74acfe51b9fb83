//! Single-slot cache of the live database handle.

use super::DatabaseHandle;
use crate::config::ConfigStore;
use crate::executor::DatabaseExecutor;
use crate::{Result, SecretsError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Holds at most one [`DatabaseHandle`], built lazily on first use.
///
/// # Concurrency
/// Cache hits share a read lock. A miss drops the read lock, takes the
/// write lock and checks the slot again before building, so concurrent
/// misses build exactly one handle.
pub struct ClientCache {
    executor: Arc<dyn DatabaseExecutor>,
    connect_timeout: Duration,
    slot: RwLock<Option<Arc<DatabaseHandle>>>,
    builds: AtomicUsize,
}

impl std::fmt::Debug for ClientCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("driver", &self.executor.driver_name())
            .field("connect_timeout", &self.connect_timeout)
            .field("builds", &self.build_count())
            .finish_non_exhaustive()
    }
}

impl ClientCache {
    /// Creates an empty cache.
    pub fn new(executor: Arc<dyn DatabaseExecutor>, connect_timeout: Duration) -> Self {
        Self {
            executor,
            connect_timeout,
            slot: RwLock::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the cached handle, building it from the stored configuration
    /// if the slot is empty.
    ///
    /// # Errors
    /// - `ConfigurationMissing` if no configuration has been written
    /// - `Storage` or `Serialization` if the configuration cannot be read
    /// - `Connection` if the handle cannot be opened; the slot stays empty
    /// - `Cancelled` if the token fires while the handle is being built; no
    ///   connection is left open and the slot stays empty
    pub async fn get(
        &self,
        store: &ConfigStore,
        cancel: &CancellationToken,
    ) -> Result<Arc<DatabaseHandle>> {
        {
            let slot = self.slot.read().await;
            if let Some(handle) = slot.as_ref() {
                return Ok(Arc::clone(handle));
            }
        }

        let mut slot = self.slot.write().await;
        if let Some(handle) = slot.as_ref() {
            tracing::debug!("Database handle built by a concurrent caller");
            return Ok(Arc::clone(handle));
        }

        let config = store.read().await?.ok_or(SecretsError::ConfigurationMissing)?;
        let handle = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Database handle build cancelled");
                return Err(SecretsError::cancelled("client build"));
            }
            built = DatabaseHandle::connect(
                Arc::clone(&self.executor),
                &config,
                self.connect_timeout,
            ) => Arc::new(built?),
        };
        self.builds.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Arc::clone(&handle));

        tracing::debug!(
            connection = %handle.redacted_connection_string(),
            "Database handle cached"
        );
        Ok(handle)
    }

    /// Drops the cached handle and closes its connection.
    ///
    /// Idempotent. A close failure is logged; the slot is empty afterwards
    /// regardless.
    pub async fn reset(&self) {
        // Close outside the lock so a slow driver does not stall readers.
        let previous = self.slot.write().await.take();
        let Some(handle) = previous else {
            return;
        };

        if let Err(e) = handle.close().await {
            tracing::warn!(error = %e, "Failed to close invalidated database handle");
        }
        tracing::debug!("Cached database handle invalidated");
    }

    /// Returns true if a handle is currently cached.
    pub async fn is_cached(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Number of handles built over the cache's lifetime.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::executor::SimulatedDatabase;
    use crate::storage::{InMemoryStorage, Storage};

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    fn fixtures() -> (SimulatedDatabase, ClientCache, ConfigStore) {
        let db = SimulatedDatabase::new();
        let cache = ClientCache::new(Arc::new(db.clone()), Duration::from_secs(5));
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        (db, cache, ConfigStore::new(storage))
    }

    #[tokio::test]
    async fn test_get_without_config() {
        let (_, cache, store) = fixtures();
        let result = cache.get(&store, &token()).await;
        assert!(matches!(result, Err(SecretsError::ConfigurationMissing)));
        assert!(!cache.is_cached().await);
    }

    #[tokio::test]
    async fn test_get_caches_handle() {
        let (db, cache, store) = fixtures();
        store.write(&ConnectionConfig::new("HOST=db")).await.unwrap();

        let first = cache.get(&store, &token()).await.unwrap();
        let second = cache.get(&store, &token()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.build_count(), 1);
        assert_eq!(db.total_opens(), 1);
    }

    #[tokio::test]
    async fn test_reset_closes_and_rebuilds() {
        let (db, cache, store) = fixtures();
        store.write(&ConnectionConfig::new("HOST=a")).await.unwrap();
        let first = cache.get(&store, &token()).await.unwrap();

        store.write(&ConnectionConfig::new("HOST=b")).await.unwrap();
        cache.reset().await;
        assert!(first.is_closed().await);
        assert_eq!(db.open_connections(), 0);

        let second = cache.get(&store, &token()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.base_connection_string(), "HOST=b");
        assert_eq!(cache.build_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_leaves_slot_empty() {
        let (_, cache, store) = fixtures();
        let config = ConnectionConfig::new("HOST=db")
            .with_username("svc")
            .with_bind_password("unknown");
        store.write(&config).await.unwrap();

        assert!(matches!(
            cache.get(&store, &token()).await,
            Err(SecretsError::Connection { .. })
        ));
        assert!(!cache.is_cached().await);
        assert_eq!(cache.build_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_build_leaves_slot_empty() {
        let (db, cache, store) = fixtures();
        db.set_open_delay(Duration::from_secs(3)).await;
        store.write(&ConnectionConfig::new("HOST=db")).await.unwrap();

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let result = cache.get(&store, &cancel).await;
        canceller.await.unwrap();

        assert!(matches!(
            result,
            Err(SecretsError::Cancelled { ref phase }) if phase == "client build"
        ));
        assert!(!cache.is_cached().await);
        assert_eq!(cache.build_count(), 0);
        assert_eq!(db.total_opens(), 0);

        // A later caller still gets a handle.
        cache.get(&store, &token()).await.unwrap();
        assert_eq!(cache.build_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let (_, cache, store) = fixtures();
        cache.reset().await;
        cache.reset().await;

        store.write(&ConnectionConfig::new("HOST=db")).await.unwrap();
        cache.get(&store, &token()).await.unwrap();
        cache.reset().await;
        cache.reset().await;
        assert!(!cache.is_cached().await);
    }
}
