//! Security utilities for credential protection.
//!
//! # Module Structure
//! - `credentials`: Bind-account container with automatic memory zeroing
//! - `password`: Generation of replacement passwords
//! - `encryption`: AES-GCM sealing of storage values (feature-gated)

mod credentials;
pub mod password;

#[cfg(feature = "encryption")]
pub mod encryption;

pub use credentials::Credentials;
pub use password::{PasswordGenerator, PasswordRules, RandomPasswordGenerator};
