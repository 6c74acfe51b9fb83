//! Database executor traits and driver factory.
//!
//! The executor is the only way the core talks to a database: it opens
//! connections from DB2 CLI keyword strings (`HOST=..;UID=..;PWD=..`) and
//! runs statements over them. The password change itself happens inside the
//! connection handshake (`NEWPWD=`), so the traits stay deliberately small.
//!
//! # Module Structure
//! - `db2`: IBM DB2 through the CLI/ODBC driver (feature `db2`)
//! - `simulated`: In-process DB2 account model honouring the `NEWPWD` handshake

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "db2")]
pub mod db2;
pub mod simulated;

#[cfg(feature = "db2")]
pub use db2::Db2Executor;
pub use simulated::SimulatedDatabase;

/// Failure reported by a database driver.
///
/// # Security
/// Drivers must not echo connection strings into these messages; the
/// messages are propagated verbatim into [`crate::SecretsError`] sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The server rejected the supplied credentials
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The server could not be reached or the handshake failed
    #[error("connection failed: {0}")]
    Connection(String),

    /// A statement failed on an open connection
    #[error("statement failed: {0}")]
    Statement(String),

    /// The operation exceeded its time limit
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Result alias for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opens connections against the target database.
///
/// # Object Safety
/// This trait is object-safe and is shared as `Arc<dyn DatabaseExecutor>`
/// between the client cache and the rotation engine.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Opens a connection using a full keyword connection string.
    ///
    /// # Errors
    /// Returns a [`DriverError`] if the server is unreachable or rejects the
    /// credentials (including a rejected `NEWPWD` change).
    async fn open(&self, connection_string: &str) -> DriverResult<Box<dyn DatabaseConnection>>;

    /// Short driver name for logs and diagnostics.
    fn driver_name(&self) -> &'static str;
}

/// An open connection produced by a [`DatabaseExecutor`].
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Executes a statement, discarding any result set.
    async fn exec(&self, statement: &str) -> DriverResult<()>;

    /// Closes the connection and releases its resources.
    async fn close(self: Box<Self>) -> DriverResult<()>;
}

/// Drivers known to this build, as `(name, description)` pairs.
pub const SUPPORTED_DRIVERS: &[(&str, &str)] = &[
    ("db2", "IBM DB2 through the CLI/ODBC driver (feature db2)"),
    (
        "simulated",
        "In-process DB2 account model (rehearsal and testing)",
    ),
];

/// Factory function to create an executor by driver name.
///
/// # Arguments
/// * `driver` - Driver name (see [`SUPPORTED_DRIVERS`])
///
/// # Errors
/// Returns `UnsupportedFeature` for drivers that are not compiled into this
/// build, and `Configuration` for unknown names.
pub fn create_executor(driver: &str) -> crate::Result<Arc<dyn DatabaseExecutor>> {
    match driver.to_ascii_lowercase().as_str() {
        "simulated" => Ok(Arc::new(SimulatedDatabase::new())),
        #[cfg(feature = "db2")]
        "db2" => Ok(Arc::new(Db2Executor::new())),
        #[cfg(not(feature = "db2"))]
        "db2" => Err(crate::SecretsError::unsupported_feature(
            "DB2 driver",
            "Compile with --features db2 and install the IBM Data Server Driver (CLI/ODBC)",
        )),
        other => Err(crate::SecretsError::configuration(format!(
            "Unknown database driver '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_simulated_executor() {
        let executor = create_executor("simulated").unwrap();
        assert_eq!(executor.driver_name(), "simulated");

        let executor = create_executor("SIMULATED").unwrap();
        assert_eq!(executor.driver_name(), "simulated");
    }

    #[cfg(feature = "db2")]
    #[test]
    fn test_create_db2_executor() {
        let executor = create_executor("DB2").unwrap();
        assert_eq!(executor.driver_name(), "db2");
    }

    #[cfg(not(feature = "db2"))]
    #[test]
    fn test_create_db2_executor_unsupported() {
        let result = create_executor("db2");
        assert!(matches!(
            result,
            Err(crate::SecretsError::UnsupportedFeature { .. })
        ));
    }

    #[test]
    fn test_create_unknown_executor() {
        let result = create_executor("oracle");
        assert!(matches!(
            result,
            Err(crate::SecretsError::Configuration { .. })
        ));
    }

    #[test]
    fn test_driver_error_display() {
        let error = DriverError::Timeout(Duration::from_secs(5));
        assert_eq!(error.to_string(), "timed out after 5s");
    }
}
