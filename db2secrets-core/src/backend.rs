//! The credential backend: configuration, cached client and rotation.
//!
//! `Backend` owns one [`ConfigStore`], one [`ClientCache`] and one
//! [`RotationEngine`]. Its lifetime bounds the cached handle; nothing here
//! is process-global.

use crate::client::{ClientCache, DatabaseHandle};
use crate::config::{CONFIG_KEY, ConfigStore, ConfigView, ConfigWriteRequest, ConnectionConfig};
use crate::executor::DatabaseExecutor;
use crate::invalidation::InvalidationHook;
use crate::rotation::{RotationEngine, RotationOptions, RotationRequest};
use crate::security::{PasswordGenerator, RandomPasswordGenerator};
use crate::storage::Storage;
use crate::{Result, SecretsError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Runtime options of a [`Backend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    /// Limit for opening the cached handle
    pub connect_timeout: Duration,
    /// Rotation timeouts and probe
    pub rotation: RotationOptions,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            rotation: RotationOptions::default(),
        }
    }
}

impl BackendOptions {
    /// Validates the options.
    ///
    /// # Errors
    /// Returns `Configuration` for zero timeouts or an empty probe statement.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(SecretsError::configuration(
                "connect_timeout must be greater than 0",
            ));
        }
        self.rotation.validate()
    }

    /// Builder method to set every timeout at once.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.rotation.connect_timeout = timeout;
        self.rotation.statement_timeout = timeout;
        self.rotation.verify_timeout = timeout;
        self
    }
}

/// Credential-management backend for one DB2 connection.
///
/// # Example
/// ```rust
/// use db2secrets_core::{Backend, BackendOptions, ConfigWriteRequest};
/// use db2secrets_core::executor::SimulatedDatabase;
/// use db2secrets_core::storage::InMemoryStorage;
/// use std::sync::Arc;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let db = SimulatedDatabase::new();
/// db.create_account("svc", "old1").await;
///
/// let backend = Backend::new(
///     Arc::new(InMemoryStorage::new()),
///     Arc::new(db.clone()),
///     BackendOptions::default(),
/// )
/// .unwrap();
///
/// backend
///     .write_config(ConfigWriteRequest {
///         connection_string: "HOST=db;PORT=50000;DATABASE=x".to_string(),
///         ..Default::default()
///     })
///     .await
///     .unwrap();
///
/// let cancel = tokio_util::sync::CancellationToken::new();
/// backend.rotate_credential("svc", "old1", "new2", &cancel).await.unwrap();
/// assert!(db.password_matches("svc", "new2").await);
/// # });
/// ```
pub struct Backend {
    store: ConfigStore,
    cache: Arc<ClientCache>,
    hook: InvalidationHook,
    engine: RotationEngine,
    generator: Arc<dyn PasswordGenerator>,
    // Serializes every read-modify-write of the stored record.
    config_write: Mutex<()>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("cache", &self.cache)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Creates a backend with the default password generator.
    ///
    /// # Errors
    /// Returns `Configuration` if the options are invalid.
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<dyn DatabaseExecutor>,
        options: BackendOptions,
    ) -> Result<Self> {
        options.validate()?;

        let cache = Arc::new(ClientCache::new(
            Arc::clone(&executor),
            options.connect_timeout,
        ));
        Ok(Self {
            store: ConfigStore::new(storage),
            hook: InvalidationHook::new(Arc::clone(&cache)),
            cache,
            engine: RotationEngine::new(executor, options.rotation),
            generator: Arc::new(RandomPasswordGenerator::new()),
            config_write: Mutex::new(()),
        })
    }

    /// Replaces the password generator used by root rotation.
    pub fn with_password_generator(mut self, generator: Arc<dyn PasswordGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// The configuration store.
    pub fn config_store(&self) -> &ConfigStore {
        &self.store
    }

    /// The client cache.
    pub fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// A hook for the host's change notifications.
    pub fn invalidation_hook(&self) -> InvalidationHook {
        self.hook.clone()
    }

    /// Validates and stores a new configuration, then drops the cached handle.
    ///
    /// When the request names the same bind account as the stored record
    /// but supplies no password, the stored bind password and its rotation
    /// time are kept. Runs one at a time with [`Backend::rotate_root`].
    ///
    /// # Errors
    /// Returns `Validation` for invalid input, including a password policy
    /// the generator does not know, and `Storage` if the write fails.
    pub async fn write_config(&self, request: ConfigWriteRequest) -> Result<()> {
        let mut config = ConnectionConfig::try_from(request)?;
        self.generator.validate_settings(&config.password)?;

        let serialized = self.config_write.lock().await;
        if config.last_bind_password.is_none() {
            let previous = match self.store.read().await {
                Ok(previous) => previous,
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Replacing unreadable stored configuration");
                    None
                }
            };
            if let Some(previous) = previous
                && previous.username.is_some()
                && previous.username == config.username
            {
                config.last_bind_password = previous.last_bind_password.clone();
                config.last_bind_password_rotation = previous.last_bind_password_rotation;
            }
        }

        self.store.write(&config).await?;
        drop(serialized);

        tracing::info!(config = %config, "Configuration updated");
        self.invalidate(CONFIG_KEY).await;
        Ok(())
    }

    /// Reads the configuration without the bind password.
    pub async fn read_config(&self) -> Result<Option<ConfigView>> {
        Ok(self.store.read().await?.map(|config| config.view()))
    }

    /// Returns true if a configuration has been written.
    pub async fn config_exists(&self) -> Result<bool> {
        self.store.exists().await
    }

    /// Returns the cached database handle, building it if needed.
    ///
    /// # Errors
    /// See [`ClientCache::get`].
    pub async fn client(&self, cancel: &CancellationToken) -> Result<Arc<DatabaseHandle>> {
        self.cache.get(&self.store, cancel).await
    }

    /// Rotates an account's password against the configured database.
    ///
    /// The new password is not persisted; that is up to the caller.
    ///
    /// # Errors
    /// See [`ClientCache::get`] and [`RotationEngine::rotate`].
    pub async fn rotate_credential(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handle = self.client(cancel).await?;
        let request = handle.rotation_request(username, old_password, new_password)?;
        self.engine.rotate(&request, cancel).await
    }

    /// Runs a caller-built rotation request.
    pub async fn rotate(&self, request: &RotationRequest, cancel: &CancellationToken) -> Result<()> {
        self.engine.rotate(request, cancel).await
    }

    /// Rotates the bind account's own password.
    ///
    /// Generates a password from the configured settings, rotates the bind
    /// account, stores the new password with the rotation time and drops the
    /// cached handle. Root rotations and configuration writes run one at a
    /// time, so neither can overwrite the other's record.
    ///
    /// # Errors
    /// - `ConfigurationMissing` if nothing is configured
    /// - `Validation` if no bind account or bind password is stored
    /// - Rotation errors from [`RotationEngine::rotate`]; the stored record
    ///   is unchanged then
    /// - `Storage` if the new password cannot be stored after a verified
    ///   rotation
    pub async fn rotate_root(&self, cancel: &CancellationToken) -> Result<DateTime<Utc>> {
        let serialized = self.config_write.lock().await;

        let config = self
            .store
            .read()
            .await?
            .ok_or(SecretsError::ConfigurationMissing)?;
        let credentials = config.bind_credentials().ok_or_else(|| {
            SecretsError::validation("root rotation requires a configured username")
        })?;
        let old_password = credentials.password().ok_or_else(|| {
            SecretsError::validation("root rotation requires a stored bind password")
        })?;

        let new_password = self.generator.generate(&config.password)?;
        let request = RotationRequest::new(
            config.connection_string.clone(),
            credentials.username(),
            old_password,
            new_password.as_str(),
        )?;
        self.engine.rotate(&request, cancel).await?;

        let rotated_at = Utc::now();
        let mut updated = config.clone();
        updated.last_bind_password = Some(new_password);
        updated.last_bind_password_rotation = Some(rotated_at);

        if let Err(e) = self.store.write(&updated).await {
            tracing::error!(
                username = credentials.username(),
                error = %e,
                "Bind password was rotated but the new password could not be stored"
            );
            return Err(e);
        }
        drop(serialized);

        self.invalidate(CONFIG_KEY).await;
        tracing::info!(username = credentials.username(), %rotated_at, "Root credential rotated");
        Ok(rotated_at)
    }

    /// Forwards a storage change notification to the invalidation hook.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.hook.invalidate(key).await
    }

    /// Drops the cached handle.
    pub async fn reset(&self) {
        self.cache.reset().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PasswordSettings;
    use crate::executor::SimulatedDatabase;
    use crate::security::PasswordRules;
    use crate::storage::InMemoryStorage;
    use zeroize::Zeroizing;

    async fn backend() -> (SimulatedDatabase, Backend) {
        let db = SimulatedDatabase::new();
        db.create_account("root", "bind1").await;
        let backend = Backend::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(db.clone()),
            BackendOptions::default(),
        )
        .unwrap();
        (db, backend)
    }

    fn bind_request() -> ConfigWriteRequest {
        ConfigWriteRequest {
            connection_string: "HOST=db;PORT=50000;DATABASE=x".to_string(),
            username: Some("root".to_string()),
            password: Some(Zeroizing::new("bind1".to_string())),
            length: Some(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_options_validation() {
        assert!(BackendOptions::default().validate().is_ok());
        let options = BackendOptions {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = BackendOptions::default().with_timeout(Duration::from_secs(2));
        assert_eq!(options.rotation.verify_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_write_config_invalidates_cache() {
        let (_, backend) = backend().await;
        backend.write_config(bind_request()).await.unwrap();
        let first = backend.client(&CancellationToken::new()).await.unwrap();

        backend.write_config(bind_request()).await.unwrap();
        assert!(!backend.cache().is_cached().await);

        let second = backend.client(&CancellationToken::new()).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_write_keeps_bind_password_for_same_user() {
        let (_, backend) = backend().await;
        backend.write_config(bind_request()).await.unwrap();

        backend
            .write_config(ConfigWriteRequest {
                password: None,
                ..bind_request()
            })
            .await
            .unwrap();

        let stored = backend.config_store().read().await.unwrap().unwrap();
        assert_eq!(
            stored.last_bind_password.as_deref().map(String::as_str),
            Some("bind1")
        );
    }

    #[tokio::test]
    async fn test_rotate_root_persists_new_password() {
        let (db, backend) = backend().await;
        backend.write_config(bind_request()).await.unwrap();
        backend.client(&CancellationToken::new()).await.unwrap();

        let rotated_at = backend.rotate_root(&CancellationToken::new()).await.unwrap();

        let stored = backend.config_store().read().await.unwrap().unwrap();
        let new_password = stored.last_bind_password.clone().unwrap();
        assert_eq!(new_password.len(), 20);
        assert!(db.password_matches("root", &new_password).await);
        assert_eq!(stored.last_bind_password_rotation, Some(rotated_at));
        assert_eq!(stored.password, PasswordSettings::Length(20));
        assert!(!backend.cache().is_cached().await);

        let view = backend.read_config().await.unwrap().unwrap();
        assert_eq!(view.last_bind_password_rotation, Some(rotated_at));
    }

    #[tokio::test]
    async fn test_rotate_root_without_bind_account() {
        let (_, backend) = backend().await;
        backend
            .write_config(ConfigWriteRequest {
                connection_string: "HOST=db".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let result = backend.rotate_root(&CancellationToken::new()).await;
        assert!(matches!(result, Err(SecretsError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_failed_root_rotation_keeps_record() {
        let (db, backend) = backend().await;
        backend.write_config(bind_request()).await.unwrap();
        db.ignore_password_changes(true);

        let result = backend.rotate_root(&CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SecretsError::RotationVerification { .. })
        ));

        let stored = backend.config_store().read().await.unwrap().unwrap();
        assert_eq!(
            stored.last_bind_password.as_deref().map(String::as_str),
            Some("bind1")
        );
        assert!(stored.last_bind_password_rotation.is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_unregistered_policy() {
        let (_, backend) = backend().await;
        let request = ConfigWriteRequest {
            password_policy: Some("strict".to_string()),
            length: None,
            ..bind_request()
        };

        let result = backend.write_config(request.clone()).await;
        assert!(matches!(result, Err(SecretsError::Validation { .. })));
        assert!(!backend.config_exists().await.unwrap());

        let rules = PasswordRules::new(32, "ABCDEFGHJKLMNPQRSTUVWXYZ23456789").unwrap();
        let backend = backend.with_password_generator(Arc::new(
            RandomPasswordGenerator::new().with_policy("strict", rules),
        ));
        backend.write_config(request).await.unwrap();
        let view = backend.read_config().await.unwrap().unwrap();
        assert_eq!(view.password_policy.as_deref(), Some("strict"));
    }

    #[tokio::test]
    async fn test_exists_and_read_without_config() {
        let (_, backend) = backend().await;
        assert!(!backend.config_exists().await.unwrap());
        assert!(backend.read_config().await.unwrap().is_none());
        assert!(matches!(
            backend.client(&CancellationToken::new()).await,
            Err(SecretsError::ConfigurationMissing)
        ));
    }
}
