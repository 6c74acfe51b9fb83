//! The persisted connection configuration record.
//!
//! # Security
//! The record carries the last known-good bind password. It is kept in a
//! `Zeroizing` buffer, omitted from `Debug` and `Display`, and never part
//! of the [`ConfigView`] returned to readers.

use super::PasswordSettings;
use crate::rotation::connection_string::{USER_KEYWORD, contains_keyword, contains_secret};
use crate::security::Credentials;
use crate::{Result, SecretsError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use zeroize::{Zeroize, Zeroizing};

/// Validated connection configuration.
///
/// # Example
/// ```rust
/// use db2secrets_core::config::{ConnectionConfig, PasswordSettings};
///
/// let config = ConnectionConfig::new("HOST=db;PORT=50000;DATABASE=x")
///     .with_username("svc")
///     .with_password_settings(PasswordSettings::Length(20));
///
/// assert!(config.validate().is_ok());
/// assert!(!config.to_string().contains("svc"));
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredConfig", into = "StoredConfig")]
pub struct ConnectionConfig {
    /// Base keyword connection string, without credentials
    pub connection_string: String,
    /// Bind account used for the cached handle and root rotation
    pub username: Option<String>,
    /// Password generation settings
    pub password: PasswordSettings,
    /// Default password time-to-live
    pub ttl: Option<Duration>,
    /// Maximum password time-to-live
    pub max_ttl: Option<Duration>,
    /// Most recent known-good bind password
    pub last_bind_password: Option<Zeroizing<String>>,
    /// When the bind password was last rotated
    pub last_bind_password_rotation: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connection_string", &self.connection_string)
            .field("username", &self.username)
            .field("password", &self.password)
            .field("ttl", &self.ttl)
            .field("max_ttl", &self.max_ttl)
            .field(
                "last_bind_password",
                &self.last_bind_password.as_ref().map(|_| "****"),
            )
            .field(
                "last_bind_password_rotation",
                &self.last_bind_password_rotation,
            )
            .finish()
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Username and password intentionally omitted
        write!(f, "ConnectionConfig({})", self.connection_string)
    }
}

impl ConnectionConfig {
    /// Creates a configuration with default password settings and no bind account.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            username: None,
            password: PasswordSettings::Default,
            ttl: None,
            max_ttl: None,
            last_bind_password: None,
            last_bind_password_rotation: None,
        }
    }

    /// Builder method to set the bind username.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Builder method to set the known-good bind password.
    pub fn with_bind_password(mut self, password: impl Into<String>) -> Self {
        self.last_bind_password = Some(Zeroizing::new(password.into()));
        self
    }

    /// Builder method to set password generation settings.
    pub fn with_password_settings(mut self, settings: PasswordSettings) -> Self {
        self.password = settings;
        self
    }

    /// Builder method to set the TTL bounds.
    pub fn with_ttl(mut self, ttl: Option<Duration>, max_ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self.max_ttl = max_ttl;
        self
    }

    /// Validates the record.
    ///
    /// # Errors
    /// Returns `Validation` if the connection string is empty or carries
    /// credentials, the bind account is inconsistent, the password settings
    /// are out of bounds, or `ttl` exceeds `max_ttl`.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(SecretsError::validation("connection_string is required"));
        }

        if contains_secret(&self.connection_string) {
            return Err(SecretsError::validation(
                "connection_string must not contain PWD or NEWPWD; supply the bind password separately",
            ));
        }

        if contains_keyword(&self.connection_string, USER_KEYWORD) {
            return Err(SecretsError::validation(
                "connection_string must not contain UID; set username instead",
            ));
        }

        if self.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(SecretsError::validation("username cannot be empty"));
        }

        if self.last_bind_password.is_some() && self.username.is_none() {
            return Err(SecretsError::validation(
                "a bind password requires a username",
            ));
        }

        match &self.password {
            PasswordSettings::Default => {}
            PasswordSettings::Policy(name) if name.trim().is_empty() => {
                return Err(SecretsError::validation("password_policy cannot be empty"));
            }
            PasswordSettings::Policy(_) => {}
            PasswordSettings::Length(length) => {
                crate::security::password::validate_length(*length)?;
            }
        }

        if let (Some(ttl), Some(max_ttl)) = (self.ttl, self.max_ttl)
            && ttl > max_ttl
        {
            return Err(SecretsError::validation(
                "ttl cannot be greater than max_ttl",
            ));
        }

        Ok(())
    }

    /// Credentials of the bind account, if one is configured.
    pub fn bind_credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|username| {
            Credentials::new(
                username.clone(),
                self.last_bind_password.as_ref().map(|p| p.to_string()),
            )
        })
    }

    /// Read view of the record, without the bind password.
    pub fn view(&self) -> ConfigView {
        ConfigView {
            connection_string: self.connection_string.clone(),
            username: self.username.clone(),
            password_policy: self.password.policy().map(str::to_string),
            length: self.password.length(),
            ttl: self.ttl.map(|d| d.as_secs()),
            max_ttl: self.max_ttl.map(|d| d.as_secs()),
            last_bind_password_rotation: self.last_bind_password_rotation,
        }
    }
}

/// Fields accepted by a configuration write, before validation.
#[derive(Clone, Default)]
pub struct ConfigWriteRequest {
    /// Base keyword connection string
    pub connection_string: String,
    /// Bind username
    pub username: Option<String>,
    /// Initial bind password
    pub password: Option<Zeroizing<String>>,
    /// Named password policy; an empty name counts as unset
    pub password_policy: Option<String>,
    /// Explicit generated password length
    pub length: Option<u32>,
    /// Default password time-to-live
    pub ttl: Option<Duration>,
    /// Maximum password time-to-live
    pub max_ttl: Option<Duration>,
}

impl std::fmt::Debug for ConfigWriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWriteRequest")
            .field("connection_string", &self.connection_string)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("password_policy", &self.password_policy)
            .field("length", &self.length)
            .field("ttl", &self.ttl)
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}

impl TryFrom<ConfigWriteRequest> for ConnectionConfig {
    type Error = SecretsError;

    fn try_from(request: ConfigWriteRequest) -> Result<Self> {
        let password =
            PasswordSettings::from_fields(request.password_policy.as_deref(), request.length)?;
        let config = Self {
            connection_string: request.connection_string.trim().to_string(),
            username: request.username.map(|u| u.trim().to_string()),
            password,
            ttl: request.ttl,
            max_ttl: request.max_ttl,
            last_bind_password: request.password,
            last_bind_password_rotation: None,
        };
        config.validate()?;
        Ok(config)
    }
}

/// What a configuration read returns. The bind password is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigView {
    /// Base keyword connection string
    pub connection_string: String,
    /// Bind username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Named password policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<String>,
    /// Explicit generated password length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Default TTL in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
    /// Maximum TTL in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<u64>,
    /// Last bind password rotation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_bind_password_rotation: Option<DateTime<Utc>>,
}

/// On-disk JSON shape of [`ConnectionConfig`].
#[derive(Default, Serialize, Deserialize)]
struct StoredConfig {
    connection_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_bind_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_bind_password_rotation: Option<DateTime<Utc>>,
}

impl Drop for StoredConfig {
    fn drop(&mut self) {
        self.last_bind_password.zeroize();
    }
}

impl TryFrom<StoredConfig> for ConnectionConfig {
    type Error = SecretsError;

    fn try_from(mut stored: StoredConfig) -> Result<Self> {
        let password =
            PasswordSettings::from_fields(stored.password_policy.as_deref(), stored.length)?;
        let config = Self {
            connection_string: std::mem::take(&mut stored.connection_string),
            username: stored.username.take(),
            password,
            ttl: stored.ttl.map(Duration::from_secs),
            max_ttl: stored.max_ttl.map(Duration::from_secs),
            last_bind_password: stored.last_bind_password.take().map(Zeroizing::new),
            last_bind_password_rotation: stored.last_bind_password_rotation,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<ConnectionConfig> for StoredConfig {
    fn from(config: ConnectionConfig) -> Self {
        Self {
            password_policy: config.password.policy().map(str::to_string),
            length: config.password.length(),
            ttl: config.ttl.map(|d| d.as_secs()),
            max_ttl: config.max_ttl.map(|d| d.as_secs()),
            last_bind_password: config.last_bind_password.as_ref().map(|p| p.to_string()),
            last_bind_password_rotation: config.last_bind_password_rotation,
            username: config.username.clone(),
            connection_string: config.connection_string.clone(),
        }
    }
}
