//! The live database handle served by the client cache.

use crate::config::ConnectionConfig;
use crate::error::redact_connection_string;
use crate::executor::{DatabaseConnection, DatabaseExecutor, DriverError};
use crate::rotation::connection_string::with_credentials;
use crate::rotation::{DEFAULT_PROBE_STATEMENT, RotationRequest};
use crate::{Result, SecretsError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

/// A connection to the target database built from one configuration.
///
/// Handles are shared as `Arc<DatabaseHandle>`. Once the cache invalidates a
/// handle its connection is closed, and any holder still using it gets
/// [`SecretsError::HandleClosed`].
pub struct DatabaseHandle {
    executor: Arc<dyn DatabaseExecutor>,
    base_connection_string: String,
    active_connection_string: Zeroizing<String>,
    username: Option<String>,
    statement_timeout: Duration,
    connection: Mutex<Option<Box<dyn DatabaseConnection>>>,
    built_at: DateTime<Utc>,
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("connection", &self.redacted_connection_string())
            .field("driver", &self.executor.driver_name())
            .field("built_at", &self.built_at)
            .finish_non_exhaustive()
    }
}

impl DatabaseHandle {
    /// Opens a connection for the configured bind account.
    ///
    /// Without a known bind password the base connection string is used as
    /// is, which lets the driver fall back to the process identity.
    ///
    /// # Errors
    /// Returns `Connection` if the driver rejects the connection or the
    /// attempt exceeds `timeout`.
    pub async fn connect(
        executor: Arc<dyn DatabaseExecutor>,
        config: &ConnectionConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let credentials = config.bind_credentials();
        let active_connection_string = match credentials.as_ref() {
            Some(creds) => match creds.password() {
                Some(password) => {
                    with_credentials(&config.connection_string, creds.username(), password)
                }
                None => {
                    tracing::debug!(
                        username = creds.username(),
                        "No bind password stored; connecting with the base connection string"
                    );
                    Zeroizing::new(config.connection_string.clone())
                }
            },
            None => Zeroizing::new(config.connection_string.clone()),
        };

        let redacted = redact_connection_string(&active_connection_string);
        tracing::debug!(connection = %redacted, "Opening database handle");

        let connection = match tokio::time::timeout(
            timeout,
            executor.open(&active_connection_string),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                return Err(SecretsError::connection_failed(
                    format!("could not connect to {}", redacted),
                    e,
                ));
            }
            Err(_) => {
                return Err(SecretsError::connection_failed(
                    format!("connecting to {} timed out", redacted),
                    DriverError::Timeout(timeout),
                ));
            }
        };

        Ok(Self {
            executor,
            base_connection_string: config.connection_string.clone(),
            active_connection_string,
            username: credentials.map(|c| c.username().to_string()),
            statement_timeout: timeout,
            connection: Mutex::new(Some(connection)),
            built_at: Utc::now(),
        })
    }

    /// Runs an administrative statement on the handle's connection.
    ///
    /// # Errors
    /// Returns `HandleClosed` after invalidation, `Connection` if the
    /// statement fails or times out.
    pub async fn exec(&self, statement: &str) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(SecretsError::HandleClosed)?;

        match tokio::time::timeout(self.statement_timeout, connection.exec(statement)).await {
            Ok(result) => result.map_err(|e| {
                SecretsError::connection_failed("statement failed on the cached handle", e)
            }),
            Err(_) => Err(SecretsError::connection_failed(
                "statement on the cached handle timed out",
                DriverError::Timeout(self.statement_timeout),
            )),
        }
    }

    /// Round-trips a no-op statement.
    pub async fn ping(&self) -> Result<()> {
        self.exec(DEFAULT_PROBE_STATEMENT).await
    }

    /// Closes the underlying connection. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns `Connection` if the driver fails to close cleanly; the
    /// handle counts as closed either way.
    pub async fn close(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };
        connection
            .close()
            .await
            .map_err(|e| SecretsError::connection_failed("closing the cached handle failed", e))
    }

    /// Returns true once the handle has been closed.
    pub async fn is_closed(&self) -> bool {
        self.connection.lock().await.is_none()
    }

    /// Configured connection string, without credentials.
    pub fn base_connection_string(&self) -> &str {
        &self.base_connection_string
    }

    /// Connection string in use, with passwords masked.
    pub fn redacted_connection_string(&self) -> String {
        redact_connection_string(&self.active_connection_string)
    }

    /// Bind account the handle authenticated as, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// When the handle was built.
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Executor the handle was built with.
    pub fn executor(&self) -> Arc<dyn DatabaseExecutor> {
        Arc::clone(&self.executor)
    }

    /// Builds a rotation request against this handle's database.
    ///
    /// # Errors
    /// Returns `Validation` for invalid request fields.
    pub fn rotation_request(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<RotationRequest> {
        RotationRequest::new(
            self.base_connection_string.clone(),
            username,
            old_password,
            new_password,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimulatedDatabase;

    #[tokio::test]
    async fn test_connect_with_bind_credentials() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;
        let config = ConnectionConfig::new("HOST=db")
            .with_username("svc")
            .with_bind_password("old1");

        let handle = DatabaseHandle::connect(Arc::new(db.clone()), &config, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(handle.username(), Some("svc"));
        assert_eq!(handle.redacted_connection_string(), "HOST=db;UID=svc;PWD=****");
        assert!(!format!("{:?}", handle).contains("old1"));
        handle.ping().await.unwrap();
        assert_eq!(db.open_connections(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "current").await;
        let config = ConnectionConfig::new("HOST=db")
            .with_username("svc")
            .with_bind_password("stale");

        let result = DatabaseHandle::connect(Arc::new(db), &config, Duration::from_secs(5)).await;
        match result {
            Err(SecretsError::Connection { context, .. }) => {
                assert!(!context.contains("stale"));
            }
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_use() {
        let db = SimulatedDatabase::new();
        let config = ConnectionConfig::new("HOST=db");
        let handle = DatabaseHandle::connect(Arc::new(db.clone()), &config, Duration::from_secs(5))
            .await
            .unwrap();

        handle.close().await.unwrap();
        handle.close().await.unwrap();

        assert!(handle.is_closed().await);
        assert!(matches!(handle.ping().await, Err(SecretsError::HandleClosed)));
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_rotation_request_uses_base_string() {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;
        let config = ConnectionConfig::new("HOST=db;PORT=50000;DATABASE=x")
            .with_username("svc")
            .with_bind_password("old1");
        let handle = DatabaseHandle::connect(Arc::new(db), &config, Duration::from_secs(5))
            .await
            .unwrap();

        let request = handle.rotation_request("app", "a1", "b2").unwrap();
        assert_eq!(
            request.primary_connection_string().as_str(),
            "HOST=db;PORT=50000;DATABASE=x;UID=app;PWD=a1"
        );
    }
}
