//! Credential storage and password rotation for DB2 accounts.
//!
//! This crate stores a DB2 connection configuration, serves a lazily built
//! handle to the target database, and rotates account passwords through the
//! DB2 `NEWPWD` handshake, proving each change by checking that the old
//! password is rejected afterwards.
//!
//! # Security Guarantees
//! - Passwords live in zeroizing buffers and are never logged
//! - Connection strings are redacted in every error and log line
//! - Credential values are brace-quoted so they cannot inject keywords
//! - Seal-wrapped configuration storage with AES-GCM (feature `encryption`)
//!
//! # Architecture
//! - [`Backend`] owns the configuration store, client cache and rotation engine
//! - Storage and database access sit behind the [`storage::Storage`] and
//!   [`executor::DatabaseExecutor`] traits
//! - Errors carry the failed phase so execution and verification failures
//!   stay distinguishable

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod invalidation;
pub mod logging;
pub mod rotation;
pub mod security;
pub mod storage;

// Re-export commonly used types
pub use backend::{Backend, BackendOptions};
pub use client::{ClientCache, DatabaseHandle};
pub use config::{
    CONFIG_KEY, ConfigStore, ConfigView, ConfigWriteRequest, ConnectionConfig, PasswordSettings,
};
pub use error::{Result, SecretsError};
pub use executor::{DatabaseConnection, DatabaseExecutor, DriverError, create_executor};
pub use invalidation::InvalidationHook;
pub use rotation::{RotationEngine, RotationOptions, RotationRequest};
pub use storage::{Storage, StorageEntry, StorageError, open_storage};

#[cfg(feature = "encryption")]
pub use security::encryption;

/// Re-exported so callers can build cancellation tokens without a direct dependency.
pub use tokio_util::sync::CancellationToken;
