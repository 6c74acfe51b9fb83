//! Connection configuration model and persistence.
//!
//! The backend keeps exactly one configuration record under the storage key
//! [`CONFIG_KEY`]. Writes replace the whole record; reads return `None`
//! until the first write.
//!
//! # Module Structure
//! - `record`: The validated [`ConnectionConfig`] record, its write request and read view
//! - `store`: [`ConfigStore`], JSON persistence through the storage collaborator

use serde::{Deserialize, Serialize};

pub mod record;
pub mod store;

pub use record::{ConfigView, ConfigWriteRequest, ConnectionConfig};
pub use store::ConfigStore;

/// Storage key of the connection configuration record
pub const CONFIG_KEY: &str = "config";

/// How new passwords are generated for this connection.
///
/// A named policy and an explicit length are mutually exclusive, so the
/// choice is a single variant rather than two optional fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSettings {
    /// Built-in default rules
    #[default]
    Default,
    /// Named password policy
    Policy(String),
    /// Default alphabet with an explicit length
    Length(u32),
}

impl PasswordSettings {
    /// Builds settings from the two optional request fields.
    ///
    /// An empty policy name counts as unset.
    ///
    /// # Errors
    /// Returns `Validation` if both a policy and a length are given, or the
    /// length is outside the accepted bounds.
    pub fn from_fields(policy: Option<&str>, length: Option<u32>) -> crate::Result<Self> {
        let policy = policy.map(str::trim).filter(|p| !p.is_empty());
        match (policy, length) {
            (Some(_), Some(_)) => Err(crate::SecretsError::validation(
                "cannot set both 'password_policy' and 'length'",
            )),
            (Some(policy), None) => Ok(Self::Policy(policy.to_string())),
            (None, Some(length)) => {
                crate::security::password::validate_length(length)?;
                Ok(Self::Length(length))
            }
            (None, None) => Ok(Self::Default),
        }
    }

    /// Policy name, if a named policy is selected.
    pub fn policy(&self) -> Option<&str> {
        match self {
            Self::Policy(name) => Some(name),
            _ => None,
        }
    }

    /// Explicit length, if one is selected.
    pub fn length(&self) -> Option<u32> {
        match self {
            Self::Length(length) => Some(*length),
            _ => None,
        }
    }
}
