//! Engine configuration

use cosmiccipher_crypto::aead::AeadAlgorithm;
use cosmiccipher_crypto::password::PasswordKdfParams;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Most prekeys a single bundle may carry
pub const MAX_PREKEYS_PER_BUNDLE: usize = 64;

/// Engine configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cipher for session traffic
    pub session_cipher: AeadAlgorithm,
    /// Prekeys generated per bundle
    pub prekeys_per_bundle: usize,
    /// Maximum plaintext size in bytes
    pub max_message_size: usize,
    /// Argon2id cost for new exports
    pub password_kdf: PasswordKdfParams,
    /// Highest Argon2id cost an imported blob may request
    pub max_import_kdf: PasswordKdfParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_cipher: AeadAlgorithm::XChaCha20Poly1305,
            prekeys_per_bundle: 4,
            max_message_size: 64 * 1024,
            password_kdf: PasswordKdfParams::default(),
            max_import_kdf: PasswordKdfParams::default_ceiling(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.password_kdf
            .validate()
            .map_err(|e| EngineError::InvalidConfig(format!("password_kdf: {}", e)))?;
        self.max_import_kdf
            .validate()
            .map_err(|e| EngineError::InvalidConfig(format!("max_import_kdf: {}", e)))?;
        if !self.password_kdf.within(&self.max_import_kdf) {
            // Our own exports must stay importable
            return Err(EngineError::InvalidConfig(
                "password_kdf exceeds max_import_kdf".to_string(),
            ));
        }
        if self.prekeys_per_bundle == 0 || self.prekeys_per_bundle > MAX_PREKEYS_PER_BUNDLE {
            return Err(EngineError::InvalidConfig(format!(
                "prekeys_per_bundle must be between 1 and {}",
                MAX_PREKEYS_PER_BUNDLE
            )));
        }
        if self.max_message_size == 0 {
            return Err(EngineError::InvalidConfig(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Cheap Argon2 settings for tests and benchmarks
    ///
    /// Never use this for real exports.
    pub fn insecure_fast() -> Self {
        Self {
            password_kdf: PasswordKdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
            ..Default::default()
        }
    }
}
