//! Validated rotation requests.

use super::connection_string::{contains_secret, with_credentials, with_new_password};
use crate::{Result, SecretsError};
use zeroize::Zeroizing;

/// A single password change for one account. Never persisted.
///
/// # Example
/// ```rust
/// use db2secrets_core::rotation::RotationRequest;
///
/// let request = RotationRequest::new("HOST=db;PORT=50000;DATABASE=x", "svc", "old1", "new2").unwrap();
/// assert_eq!(
///     request.rotate_connection_string().as_str(),
///     "HOST=db;PORT=50000;DATABASE=x;UID=svc;PWD=old1;NEWPWD=new2"
/// );
/// ```
#[derive(Clone)]
pub struct RotationRequest {
    connection_string: String,
    username: String,
    old_password: Zeroizing<String>,
    new_password: Zeroizing<String>,
}

impl std::fmt::Debug for RotationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationRequest")
            .field("connection_string", &self.connection_string)
            .field("username", &self.username)
            .field("old_password", &"****")
            .field("new_password", &"****")
            .finish()
    }
}

impl RotationRequest {
    /// Builds a request after checking every field.
    ///
    /// # Errors
    /// Returns `Validation` if any field is empty, the connection string
    /// already carries a password, or the new password equals the old one.
    pub fn new(
        connection_string: impl Into<String>,
        username: impl Into<String>,
        old_password: impl Into<String>,
        new_password: impl Into<String>,
    ) -> Result<Self> {
        let request = Self {
            connection_string: connection_string.into(),
            username: username.into(),
            old_password: Zeroizing::new(old_password.into()),
            new_password: Zeroizing::new(new_password.into()),
        };

        if request.connection_string.trim().is_empty() {
            return Err(SecretsError::validation("connection_string is required"));
        }
        if request.username.trim().is_empty() {
            return Err(SecretsError::validation("username is required"));
        }
        if request.old_password.is_empty() {
            return Err(SecretsError::validation("old password is required"));
        }
        if request.new_password.is_empty() {
            return Err(SecretsError::validation("new password is required"));
        }
        if contains_secret(&request.connection_string) {
            return Err(SecretsError::validation(
                "connection_string must not already contain PWD or NEWPWD",
            ));
        }
        if request.old_password == request.new_password {
            return Err(SecretsError::validation(
                "new password must differ from the old password",
            ));
        }

        Ok(request)
    }

    /// Account being rotated.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Base connection string without credentials.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Base string with the account and its old password.
    pub fn primary_connection_string(&self) -> Zeroizing<String> {
        with_credentials(&self.connection_string, &self.username, &self.old_password)
    }

    /// Primary string plus the `NEWPWD` directive.
    pub fn rotate_connection_string(&self) -> Zeroizing<String> {
        with_new_password(&self.primary_connection_string(), &self.new_password)
    }
}
