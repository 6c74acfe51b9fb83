//! Error types with credential sanitization.
//!
//! Every error in this module is safe to log or display: passwords are never
//! embedded in messages, and connection strings are passed through
//! [`redact_connection_string`] before they appear in any context string.

use crate::executor::DriverError;
use crate::storage::StorageError;
use thiserror::Error;

pub use crate::rotation::connection_string::redact_connection_string;

/// Main error type for db2secrets operations.
///
/// # Security
/// Messages never contain passwords. Variants that wrap a driver or storage
/// error keep the original as `source` so callers can inspect it without
/// the message being rewritten.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Malformed or contradictory configuration input
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A client was requested before any configuration was written
    #[error("No connection configuration has been written yet")]
    ConfigurationMissing,

    /// The rotate connection could not be opened or the probe statement failed
    #[error("Password rotation failed: {context}")]
    RotationExecution {
        context: String,
        #[source]
        source: DriverError,
    },

    /// The rotation appeared to succeed but the old password still authenticates
    #[error("Password rotation could not be verified: {context}")]
    RotationVerification {
        context: String,
        #[source]
        source: Option<DriverError>,
    },

    /// The storage collaborator failed (infrastructure error, passed through)
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Building the cached database handle failed
    #[error("Database connection failed: {context}")]
    Connection {
        context: String,
        #[source]
        source: DriverError,
    },

    /// The handle was invalidated while a caller still held it
    #[error("Database handle has been invalidated; request a new client")]
    HandleClosed,

    /// The operation was cancelled by the caller
    #[error("Operation cancelled during {phase}")]
    Cancelled { phase: String },

    /// Serialization or deserialization of a stored record failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Internal setup or environment error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unsupported driver, storage backend or feature
    #[error("Unsupported operation: {feature} ({hint})")]
    UnsupportedFeature { feature: String, hint: String },

    /// Sealing or unsealing a storage entry failed
    #[cfg(feature = "encryption")]
    #[error("Encryption operation failed: {context}")]
    Encryption { context: String },
}

/// Convenience type alias for Results with SecretsError
pub type Result<T> = std::result::Result<T, SecretsError>;

impl SecretsError {
    /// Creates a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a rotation execution error
    pub fn rotation_execution(context: impl Into<String>, source: DriverError) -> Self {
        Self::RotationExecution {
            context: context.into(),
            source,
        }
    }

    /// Creates a rotation verification error
    pub fn rotation_verification(
        context: impl Into<String>,
        source: Option<DriverError>,
    ) -> Self {
        Self::RotationVerification {
            context: context.into(),
            source,
        }
    }

    /// Creates a connection error with sanitized context
    pub fn connection_failed(context: impl Into<String>, source: DriverError) -> Self {
        Self::Connection {
            context: context.into(),
            source,
        }
    }

    /// Creates a cancellation error for the given phase
    pub fn cancelled(phase: impl Into<String>) -> Self {
        Self::Cancelled {
            phase: phase.into(),
        }
    }

    /// Creates a serialization error with context
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Creates an unsupported feature error
    pub fn unsupported_feature(feature: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            hint: hint.into(),
        }
    }

    /// Returns true for failures of the surrounding infrastructure (storage)
    /// rather than of the request itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the error identifies a failed rotation phase.
    pub fn is_rotation_failure(&self) -> bool {
        matches!(
            self,
            Self::RotationExecution { .. } | Self::RotationVerification { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = SecretsError::validation("connection_string is required");
        assert!(error.to_string().contains("connection_string is required"));

        let error = SecretsError::unsupported_feature("db2 driver", "not linked");
        assert!(error.to_string().contains("db2 driver"));
        assert!(error.to_string().contains("not linked"));
    }

    #[test]
    fn test_storage_errors_are_infrastructure() {
        let error = SecretsError::from(StorageError::Unavailable("disk full".to_string()));
        assert!(error.is_infrastructure());
        assert!(error.to_string().contains("disk full"));

        assert!(!SecretsError::ConfigurationMissing.is_infrastructure());
    }

    #[test]
    fn test_rotation_failures_are_distinguishable() {
        let execution = SecretsError::rotation_execution(
            "could not open rotate connection",
            DriverError::Authentication("SQL30082N".to_string()),
        );
        let verification = SecretsError::rotation_verification("old password accepted", None);

        assert!(execution.is_rotation_failure());
        assert!(verification.is_rotation_failure());
        assert!(matches!(execution, SecretsError::RotationExecution { .. }));
        assert!(matches!(
            verification,
            SecretsError::RotationVerification { .. }
        ));
        assert!(!SecretsError::HandleClosed.is_rotation_failure());
    }

    #[test]
    fn test_execution_error_keeps_driver_source() {
        let error = SecretsError::rotation_execution(
            "probe statement failed",
            DriverError::Statement("SQL0204N".to_string()),
        );
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("statement failed: SQL0204N"));
    }
}
