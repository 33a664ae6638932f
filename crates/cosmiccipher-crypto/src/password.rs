//! Password-based key derivation (Argon2id)
//!
//! Memory-hard derivation of the key that protects exported identities. The
//! parameters travel inside every export so an import needs nothing but the
//! password; importers bound them with a ceiling so a hostile blob cannot
//! demand unbounded memory or time.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::aead::{AeadKey, KEY_SIZE};
use crate::error::{CryptoError, Result};

/// Salt length in bytes
pub const SALT_SIZE: usize = 16;

/// Argon2id cost parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordKdfParams {
    /// Memory size in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for PasswordKdfParams {
    fn default() -> Self {
        // OWASP minimum for Argon2id: 19 MiB, 2 passes, 1 lane
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl PasswordKdfParams {
    /// Upper bound accepted from untrusted exports by default
    pub const fn default_ceiling() -> Self {
        Self {
            memory_kib: 1024 * 1024,
            iterations: 16,
            parallelism: 8,
        }
    }

    /// Check the parameters against Argon2's own limits
    pub fn validate(&self) -> Result<()> {
        self.argon2_params().map(|_| ())
    }

    /// Whether every cost stays at or below `ceiling`
    pub fn within(&self, ceiling: &PasswordKdfParams) -> bool {
        self.memory_kib <= ceiling.memory_kib
            && self.iterations <= ceiling.iterations
            && self.parallelism <= ceiling.parallelism
    }

    /// Canonical encoding, bound into the export's associated data
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&self.memory_kib.to_be_bytes());
        out[4..8].copy_from_slice(&self.iterations.to_be_bytes());
        out[8..].copy_from_slice(&self.parallelism.to_be_bytes());
        out
    }

    fn argon2_params(&self) -> Result<Params> {
        Ok(Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )?)
    }
}

/// Derive an AEAD key from a password and salt
///
/// Slow by construction; callers should keep it off latency-sensitive
/// paths and must not hold shared locks while it runs.
pub fn derive_key(password: &[u8], salt: &[u8], params: &PasswordKdfParams) -> Result<AeadKey> {
    if salt.len() != SALT_SIZE {
        return Err(CryptoError::PasswordKdf(format!(
            "salt must be {} bytes, got {}",
            SALT_SIZE,
            salt.len()
        )));
    }
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    argon2.hash_password_into(password, salt, &mut output[..])?;
    Ok(AeadKey::from_bytes(*output))
}
