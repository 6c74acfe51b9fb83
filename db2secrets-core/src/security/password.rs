//! Password generation for root rotation.
//!
//! The configured [`PasswordSettings`] select how a new password is built:
//! the default rules, a named policy registered with the generator, or an
//! explicit length. Generated passwords are returned in `Zeroizing` buffers.

use crate::config::PasswordSettings;
use crate::{Result, SecretsError};
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use zeroize::Zeroizing;

/// Length used when no policy or length is configured
pub const DEFAULT_PASSWORD_LENGTH: u32 = 32;
/// Shortest accepted generated password
pub const MIN_PASSWORD_LENGTH: u32 = 8;
/// Longest accepted generated password
pub const MAX_PASSWORD_LENGTH: u32 = 255;
/// Name of the policy every generator registers by default
pub const DEFAULT_POLICY_NAME: &str = "default";

const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Length and alphabet of a generated password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRules {
    length: u32,
    charset: Vec<char>,
}

impl PasswordRules {
    /// Creates rules after checking the length bounds and alphabet.
    ///
    /// # Errors
    /// Returns `Validation` if the length is outside
    /// `MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH` or the charset is empty.
    pub fn new(length: u32, charset: &str) -> Result<Self> {
        validate_length(length)?;
        let mut charset: Vec<char> = charset.chars().collect();
        charset.sort_unstable();
        charset.dedup();
        if charset.is_empty() {
            return Err(SecretsError::validation(
                "password charset must not be empty",
            ));
        }
        Ok(Self { length, charset })
    }

    /// Alphanumeric rules of the given length.
    pub fn alphanumeric(length: u32) -> Result<Self> {
        Self::new(length, ALPHANUMERIC)
    }

    /// Password length in characters.
    pub fn length(&self) -> u32 {
        self.length
    }
}

/// Checks a configured password length against the accepted bounds.
pub fn validate_length(length: u32) -> Result<()> {
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
        return Err(SecretsError::validation(format!(
            "length must be between {} and {}",
            MIN_PASSWORD_LENGTH, MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Produces new passwords from the configured settings.
pub trait PasswordGenerator: Send + Sync {
    /// Generates a password.
    ///
    /// # Errors
    /// Returns `Configuration` if the settings name a policy the generator
    /// does not know.
    fn generate(&self, settings: &PasswordSettings) -> Result<Zeroizing<String>>;

    /// Checks that the settings can be served before they are stored.
    ///
    /// # Errors
    /// Returns `Validation` for an unknown policy or an out-of-range length.
    fn validate_settings(&self, settings: &PasswordSettings) -> Result<()>;
}

/// Generator drawing characters uniformly from the rules' alphabet.
#[derive(Debug, Clone)]
pub struct RandomPasswordGenerator {
    default_rules: PasswordRules,
    policies: HashMap<String, PasswordRules>,
}

impl Default for RandomPasswordGenerator {
    fn default() -> Self {
        let default_rules = PasswordRules {
            length: DEFAULT_PASSWORD_LENGTH,
            charset: ALPHANUMERIC.chars().collect(),
        };
        let mut policies = HashMap::new();
        policies.insert(DEFAULT_POLICY_NAME.to_string(), default_rules.clone());
        Self {
            default_rules,
            policies,
        }
    }
}

impl RandomPasswordGenerator {
    /// Creates a generator with the built-in `default` policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a named policy.
    pub fn with_policy(mut self, name: impl Into<String>, rules: PasswordRules) -> Self {
        self.policies.insert(name.into(), rules);
        self
    }

    /// Resolves the rules the settings select.
    pub fn rules_for(&self, settings: &PasswordSettings) -> Result<PasswordRules> {
        match settings {
            PasswordSettings::Default => Ok(self.default_rules.clone()),
            PasswordSettings::Length(length) => {
                validate_length(*length)?;
                Ok(PasswordRules {
                    length: *length,
                    charset: self.default_rules.charset.clone(),
                })
            }
            PasswordSettings::Policy(name) => self.policies.get(name).cloned().ok_or_else(|| {
                SecretsError::configuration(format!("password policy '{}' is not registered", name))
            }),
        }
    }
}

impl PasswordGenerator for RandomPasswordGenerator {
    fn generate(&self, settings: &PasswordSettings) -> Result<Zeroizing<String>> {
        let rules = self.rules_for(settings)?;
        let mut rng = rand::rng();
        let mut password = Zeroizing::new(String::with_capacity(rules.length as usize));
        for _ in 0..rules.length {
            if let Some(c) = rules.charset.choose(&mut rng) {
                password.push(*c);
            }
        }
        Ok(password)
    }

    fn validate_settings(&self, settings: &PasswordSettings) -> Result<()> {
        match self.rules_for(settings) {
            Ok(_) => Ok(()),
            Err(SecretsError::Configuration { message }) => Err(SecretsError::validation(message)),
            Err(e) => Err(e),
        }
    }
}
