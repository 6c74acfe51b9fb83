//! Password change and post-rotation verification.
//!
//! A rotation opens the rotate connection (old password plus `NEWPWD`),
//! runs a probe statement and closes it, then tries the old password alone.
//! Only a rejected old password proves the change took effect; an accepted
//! one is reported as `RotationVerification` even though the first phase
//! succeeded.
//!
//! Every connection attempt is bounded by a timeout and raced against the
//! caller's [`CancellationToken`]. A connection that was opened is closed on
//! every exit path, including cancellation.

use super::RotationRequest;
use crate::error::redact_connection_string;
use crate::executor::{DatabaseConnection, DatabaseExecutor, DriverError};
use crate::{Result, SecretsError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Side-effect-free statement used to confirm a DB2 session is usable
pub const DEFAULT_PROBE_STATEMENT: &str = "SELECT 1 FROM SYSIBM.SYSDUMMY1";

/// Timeouts and probe statement for a rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOptions {
    /// Limit for opening the rotate connection
    pub connect_timeout: Duration,
    /// Limit for the probe statement and each close
    pub statement_timeout: Duration,
    /// Limit for the verification connection attempt
    pub verify_timeout: Duration,
    /// Statement run over the rotate connection
    pub probe_statement: String,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            statement_timeout: Duration::from_secs(30),
            verify_timeout: Duration::from_secs(30),
            probe_statement: DEFAULT_PROBE_STATEMENT.to_string(),
        }
    }
}

impl RotationOptions {
    /// Validates the options.
    ///
    /// # Errors
    /// Returns `Configuration` for zero timeouts or an empty probe statement.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("statement_timeout", self.statement_timeout),
            ("verify_timeout", self.verify_timeout),
        ] {
            if value.is_zero() {
                return Err(SecretsError::configuration(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if self.probe_statement.trim().is_empty() {
            return Err(SecretsError::configuration(
                "probe_statement cannot be empty",
            ));
        }
        Ok(())
    }
}

enum Bounded<T> {
    Completed(T),
    TimedOut(Duration),
    Cancelled,
}

async fn bounded<F: Future>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: F,
) -> Bounded<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Bounded::Cancelled,
        result = tokio::time::timeout(limit, operation) => match result {
            Ok(output) => Bounded::Completed(output),
            Err(_) => Bounded::TimedOut(limit),
        },
    }
}

/// Performs password rotations against a database executor.
#[derive(Clone)]
pub struct RotationEngine {
    executor: Arc<dyn DatabaseExecutor>,
    options: RotationOptions,
}

impl std::fmt::Debug for RotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationEngine")
            .field("driver", &self.executor.driver_name())
            .field("options", &self.options)
            .finish()
    }
}

impl RotationEngine {
    /// Creates an engine.
    pub fn new(executor: Arc<dyn DatabaseExecutor>, options: RotationOptions) -> Self {
        Self { executor, options }
    }

    /// Options in effect.
    pub fn options(&self) -> &RotationOptions {
        &self.options
    }

    /// Changes the account password and verifies the old one is rejected.
    ///
    /// Nothing is retried. The caller persists the new password if wanted.
    ///
    /// # Errors
    /// - `RotationExecution` if the rotate connection cannot be opened, the
    ///   probe fails, or either times out
    /// - `RotationVerification` if the old password still authenticates or
    ///   the verification attempt times out
    /// - `Cancelled` if the token fires; opened connections are closed first
    pub async fn rotate(&self, request: &RotationRequest, cancel: &CancellationToken) -> Result<()> {
        let primary = request.primary_connection_string();
        let rotate = request.rotate_connection_string();

        tracing::info!(
            username = request.username(),
            connection = %redact_connection_string(&primary),
            driver = self.executor.driver_name(),
            "Rotating password"
        );

        self.change_password(&rotate, cancel).await?;
        tracing::debug!(username = request.username(), "Password change accepted, verifying");

        self.verify_old_password_rejected(&primary, cancel).await?;
        tracing::info!(username = request.username(), "Password rotation verified");
        Ok(())
    }

    async fn change_password(&self, rotate: &str, cancel: &CancellationToken) -> Result<()> {
        let connection = match bounded(
            cancel,
            self.options.connect_timeout,
            self.executor.open(rotate),
        )
        .await
        {
            Bounded::Completed(Ok(connection)) => connection,
            Bounded::Completed(Err(e)) => {
                return Err(SecretsError::rotation_execution(
                    "could not open the rotate connection",
                    e,
                ));
            }
            Bounded::TimedOut(limit) => {
                return Err(SecretsError::rotation_execution(
                    "opening the rotate connection timed out",
                    DriverError::Timeout(limit),
                ));
            }
            Bounded::Cancelled => return Err(SecretsError::cancelled("password change")),
        };

        let probe = bounded(
            cancel,
            self.options.statement_timeout,
            connection.exec(&self.options.probe_statement),
        )
        .await;
        self.close(connection, "rotate").await;

        match probe {
            Bounded::Completed(Ok(())) => Ok(()),
            Bounded::Completed(Err(e)) => Err(SecretsError::rotation_execution(
                "probe statement failed on the rotate connection",
                e,
            )),
            Bounded::TimedOut(limit) => Err(SecretsError::rotation_execution(
                "probe statement timed out",
                DriverError::Timeout(limit),
            )),
            Bounded::Cancelled => Err(SecretsError::cancelled("password change")),
        }
    }

    async fn verify_old_password_rejected(
        &self,
        primary: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match bounded(
            cancel,
            self.options.verify_timeout,
            self.executor.open(primary),
        )
        .await
        {
            Bounded::Completed(Ok(connection)) => {
                self.close(connection, "verification").await;
                tracing::warn!("Old password still authenticates after rotation");
                Err(SecretsError::rotation_verification(
                    "the old password still authenticates; the password was not changed",
                    None,
                ))
            }
            Bounded::Completed(Err(e)) => {
                tracing::debug!(reason = %e, "Old password rejected as expected");
                Ok(())
            }
            // A hang is not evidence that the old password was rejected.
            Bounded::TimedOut(limit) => Err(SecretsError::rotation_verification(
                "the verification connection attempt timed out",
                Some(DriverError::Timeout(limit)),
            )),
            Bounded::Cancelled => Err(SecretsError::cancelled("verification")),
        }
    }

    /// Closes a connection; failures are logged, never returned.
    async fn close(&self, connection: Box<dyn DatabaseConnection>, purpose: &str) {
        match tokio::time::timeout(self.options.statement_timeout, connection.close()).await {
            Ok(Ok(())) => tracing::debug!(purpose, "Connection closed"),
            Ok(Err(e)) => tracing::warn!(purpose, error = %e, "Failed to close connection"),
            Err(_) => tracing::warn!(purpose, "Timed out closing connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimulatedDatabase;

    async fn setup() -> (SimulatedDatabase, RotationEngine, RotationRequest) {
        let db = SimulatedDatabase::new();
        db.create_account("svc", "old1").await;
        let engine = RotationEngine::new(Arc::new(db.clone()), RotationOptions::default());
        let request =
            RotationRequest::new("HOST=db;PORT=50000;DATABASE=x", "svc", "old1", "new2").unwrap();
        (db, engine, request)
    }

    #[test]
    fn test_options_validation() {
        assert!(RotationOptions::default().validate().is_ok());

        let options = RotationOptions {
            verify_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = RotationOptions {
            probe_statement: " ".to_string(),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[tokio::test]
    async fn test_rotation_success() {
        let (db, engine, request) = setup().await;

        engine
            .rotate(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(db.password_matches("svc", "new2").await);
        assert_eq!(db.statements_executed(), 1);
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_rotation_not_applied_is_verification_failure() {
        let (db, engine, request) = setup().await;
        db.ignore_password_changes(true);

        let result = engine.rotate(&request, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(SecretsError::RotationVerification { .. })
        ));
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_wrong_old_password_is_execution_failure() {
        let (db, engine, _) = setup().await;
        let request = RotationRequest::new("HOST=db", "svc", "wrong", "new2").unwrap();

        let result = engine.rotate(&request, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(SecretsError::RotationExecution {
                source: DriverError::Authentication(_),
                ..
            })
        ));
        assert!(db.password_matches("svc", "old1").await);
    }

    #[tokio::test]
    async fn test_probe_failure_closes_connection() {
        let (db, engine, request) = setup().await;
        db.fail_statements(true);

        let result = engine.rotate(&request, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(SecretsError::RotationExecution {
                source: DriverError::Statement(_),
                ..
            })
        ));
        assert_eq!(db.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (db, engine, request) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.rotate(&request, &cancel).await;

        assert!(matches!(result, Err(SecretsError::Cancelled { .. })));
        assert!(db.password_matches("svc", "old1").await);
    }
}
