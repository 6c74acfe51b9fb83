//! AES-GCM sealing of storage values with Argon2id key derivation.
//!
//! Seal-wrapped storage keys (the connection configuration, which carries
//! the bind password) are stored as a [`SealedValue`] envelope: AES-GCM-256
//! ciphertext, a random 96-bit nonce, the authentication tag, and the
//! Argon2id parameters needed to re-derive the key from the passphrase.
//!
//! # Security Guarantees
//! - Fresh random nonce and salt for every seal
//! - Tampering with any envelope field fails authentication
//! - Derived key material is zeroed on drop
//! - The storage key is bound as associated data, so a sealed value cannot
//!   be replayed under a different key

use crate::{Result, SecretsError};
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload, rand_core::RngCore},
};
use argon2::{
    Argon2, Params, Version,
    password_hash::{PasswordHasher, SaltString},
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Envelope algorithm identifier
pub const SEAL_ALGORITHM: &str = "AES-GCM-256";

/// AES-GCM nonce size: 96 bits (NIST SP 800-38D §8.2.1)
const AES_GCM_NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size: 128 bits
const AES_GCM_TAG_SIZE: usize = 16;

/// AES-256 key size
const AES_KEY_SIZE: usize = 32;

/// Argon2id salt size: 128 bits (RFC 9106 §4)
const ARGON2_SALT_SIZE: usize = 16;

/// Argon2id memory cost: 64 MiB
const ARGON2_MEMORY_COST: u32 = 65536;

/// Argon2id time cost: 3 iterations
const ARGON2_TIME_COST: u32 = 3;

/// Argon2id parallelism: 4 lanes
const ARGON2_PARALLELISM: u32 = 4;

/// Key derivation parameters embedded in every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Random salt (16 bytes)
    pub salt: Vec<u8>,
    /// Memory cost in KiB
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
}

impl KdfParams {
    /// Creates new KDF parameters with a random 16-byte salt.
    pub fn new() -> Self {
        let mut salt = vec![0u8; ARGON2_SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        Self {
            salt,
            memory_cost: ARGON2_MEMORY_COST,
            time_cost: ARGON2_TIME_COST,
            parallelism: ARGON2_PARALLELISM,
        }
    }

    /// Validates that KDF parameters meet the minimum thresholds.
    ///
    /// # Errors
    /// Returns `Encryption` if an envelope carries weakened parameters.
    pub fn validate(&self) -> Result<()> {
        if self.salt.len() < ARGON2_SALT_SIZE {
            return Err(encryption_error(format!(
                "salt must be at least {} bytes",
                ARGON2_SALT_SIZE
            )));
        }
        if self.memory_cost < ARGON2_MEMORY_COST {
            return Err(encryption_error(format!(
                "memory cost must be at least {} KiB",
                ARGON2_MEMORY_COST
            )));
        }
        if self.time_cost < ARGON2_TIME_COST {
            return Err(encryption_error(format!(
                "time cost must be at least {} iterations",
                ARGON2_TIME_COST
            )));
        }
        if self.parallelism < 1 {
            return Err(encryption_error("parallelism must be at least 1"));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Sealed storage value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedValue {
    /// Encryption algorithm (always [`SEAL_ALGORITHM`])
    pub algorithm: String,
    /// Random 96-bit nonce
    pub nonce: Vec<u8>,
    /// Encrypted payload without the tag
    pub ciphertext: Vec<u8>,
    /// Authentication tag (16 bytes)
    pub auth_tag: Vec<u8>,
    /// Key derivation parameters
    pub kdf_params: KdfParams,
}

fn encryption_error(context: impl Into<String>) -> SecretsError {
    SecretsError::Encryption {
        context: context.into(),
    }
}

fn validate_sealed_value(sealed: &SealedValue) -> Result<()> {
    if sealed.algorithm != SEAL_ALGORITHM {
        return Err(encryption_error(format!(
            "unsupported seal algorithm: {}",
            sealed.algorithm
        )));
    }
    if sealed.nonce.len() != AES_GCM_NONCE_SIZE {
        return Err(encryption_error(format!(
            "invalid nonce length: expected {}, got {}",
            AES_GCM_NONCE_SIZE,
            sealed.nonce.len()
        )));
    }
    if sealed.auth_tag.len() != AES_GCM_TAG_SIZE {
        return Err(encryption_error(format!(
            "invalid authentication tag length: expected {}, got {}",
            AES_GCM_TAG_SIZE,
            sealed.auth_tag.len()
        )));
    }
    sealed.kdf_params.validate()
}

fn derive_key(passphrase: &str, kdf_params: &KdfParams) -> Result<Zeroizing<[u8; AES_KEY_SIZE]>> {
    kdf_params.validate()?;

    let params = Params::new(
        kdf_params.memory_cost,
        kdf_params.time_cost,
        kdf_params.parallelism,
        Some(AES_KEY_SIZE),
    )
    .map_err(|e| encryption_error(format!("invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);
    let salt = SaltString::encode_b64(&kdf_params.salt)
        .map_err(|e| encryption_error(format!("invalid salt: {}", e)))?;

    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| encryption_error(format!("key derivation failed: {}", e)))?;
    let output = hash
        .hash
        .ok_or_else(|| encryption_error("key derivation produced no output"))?;

    if output.as_bytes().len() != AES_KEY_SIZE {
        return Err(encryption_error(format!(
            "key derivation produced {} bytes, expected {}",
            output.as_bytes().len(),
            AES_KEY_SIZE
        )));
    }

    let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
    key.copy_from_slice(output.as_bytes());
    Ok(key)
}

/// Seals a storage value under a passphrase.
///
/// # Arguments
/// * `storage_key` - Key the value is stored under (bound as associated data)
/// * `plaintext` - Serialized record
/// * `passphrase` - Seal passphrase
pub fn seal(storage_key: &str, plaintext: &[u8], passphrase: &str) -> Result<SealedValue> {
    let kdf_params = KdfParams::new();
    let key = derive_key(passphrase, &kdf_params)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let sealed = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: storage_key.as_bytes(),
            },
        )
        .map_err(|e| encryption_error(format!("seal failed: {}", e)))?;

    let tag_start = sealed
        .len()
        .checked_sub(AES_GCM_TAG_SIZE)
        .ok_or_else(|| encryption_error("sealed output shorter than the authentication tag"))?;
    let (ciphertext, auth_tag) = sealed.split_at(tag_start);

    Ok(SealedValue {
        algorithm: SEAL_ALGORITHM.to_string(),
        nonce: nonce.to_vec(),
        ciphertext: ciphertext.to_vec(),
        auth_tag: auth_tag.to_vec(),
        kdf_params,
    })
}

/// Opens a sealed storage value.
///
/// # Errors
/// Returns `Encryption` if the envelope is malformed, the passphrase is
/// wrong, the value was tampered with, or it was sealed under another key.
pub fn unseal(storage_key: &str, sealed: &SealedValue, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    validate_sealed_value(sealed)?;

    let key = derive_key(passphrase, &sealed.kdf_params)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key));
    let nonce = Nonce::from_slice(&sealed.nonce);

    let mut full = sealed.ciphertext.clone();
    full.extend_from_slice(&sealed.auth_tag);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &full,
                aad: storage_key.as_bytes(),
            },
        )
        .map_err(|e| {
            encryption_error(format!(
                "unseal failed (wrong passphrase or corrupted entry): {}",
                e
            ))
        })?;

    Ok(Zeroizing::new(plaintext))
}
