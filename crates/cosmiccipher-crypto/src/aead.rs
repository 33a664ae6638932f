//! Authenticated Encryption with Associated Data (AEAD)
//!
//! Provides both XChaCha20-Poly1305 and AES-256-GCM. Callers supply the
//! nonce explicitly: session traffic uses a per-key message counter, identity
//! exports use a random nonce. Decryption fails closed; no partially
//! verified plaintext ever leaves this module.

use aes_gcm::{
    aead::{Aead as AeadTrait, KeyInit, Payload},
    Aes256Gcm,
};
use chacha20poly1305::XChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Nonce size for XChaCha20-Poly1305 (192 bits)
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// Nonce size for AES-256-GCM (96 bits)
pub const AES_GCM_NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits)
pub const TAG_SIZE: usize = 16;

/// Key size for both algorithms (256 bits)
pub const KEY_SIZE: usize = 32;

/// AEAD key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for AeadKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// AEAD algorithm selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// XChaCha20-Poly1305 (default, better for software)
    #[default]
    XChaCha20Poly1305,
    /// AES-256-GCM (faster with hardware support)
    Aes256Gcm,
}

impl AeadAlgorithm {
    /// Nonce length used by this algorithm
    pub const fn nonce_size(self) -> usize {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => XCHACHA_NONCE_SIZE,
            AeadAlgorithm::Aes256Gcm => AES_GCM_NONCE_SIZE,
        }
    }

    /// Stable one-byte tag, bound into associated data
    pub const fn tag(self) -> u8 {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => 1,
            AeadAlgorithm::Aes256Gcm => 2,
        }
    }
}

/// Nonce (number used once) for AEAD
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nonce {
    /// XChaCha20-Poly1305 nonce (24 bytes)
    XChaCha([u8; XCHACHA_NONCE_SIZE]),
    /// AES-GCM nonce (12 bytes)
    AesGcm([u8; AES_GCM_NONCE_SIZE]),
}

impl Nonce {
    /// Deterministic nonce from a message counter
    ///
    /// The counter is written big-endian into the last eight bytes; the rest
    /// stays zero. Unique as long as the counter never repeats under one key.
    pub fn from_counter(algorithm: AeadAlgorithm, counter: u64) -> Self {
        match algorithm {
            AeadAlgorithm::XChaCha20Poly1305 => {
                let mut nonce = [0u8; XCHACHA_NONCE_SIZE];
                nonce[XCHACHA_NONCE_SIZE - 8..].copy_from_slice(&counter.to_be_bytes());
                Self::XChaCha(nonce)
            }
            AeadAlgorithm::Aes256Gcm => {
                let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
                nonce[AES_GCM_NONCE_SIZE - 8..].copy_from_slice(&counter.to_be_bytes());
                Self::AesGcm(nonce)
            }
        }
    }

    /// Get nonce bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Nonce::XChaCha(n) => n,
            Nonce::AesGcm(n) => n,
        }
    }
}

/// AEAD cipher
pub struct Aead {
    algorithm: AeadAlgorithm,
}

impl Aead {
    /// Create a new AEAD cipher with the default algorithm (XChaCha20-Poly1305)
    pub fn new() -> Self {
        Self {
            algorithm: AeadAlgorithm::default(),
        }
    }

    /// Create with a specific algorithm
    pub fn with_algorithm(algorithm: AeadAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Encrypt plaintext with associated data
    ///
    /// # Arguments
    /// * `key` - The encryption key
    /// * `nonce` - Must match the selected algorithm
    /// * `plaintext` - The message to encrypt
    /// * `aad` - Associated data (authenticated but not encrypted)
    ///
    /// # Returns
    /// Ciphertext with the authentication tag appended
    pub fn seal(
        &self,
        key: &AeadKey,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let payload = Payload { msg: plaintext, aad };
        match (self.algorithm, nonce) {
            (AeadAlgorithm::XChaCha20Poly1305, Nonce::XChaCha(n)) => {
                XChaCha20Poly1305::new(key.as_bytes().into())
                    .encrypt(n.into(), payload)
                    .map_err(|_| {
                        CryptoError::EncryptionFailed("XChaCha20-Poly1305 failed".to_string())
                    })
            }
            (AeadAlgorithm::Aes256Gcm, Nonce::AesGcm(n)) => Aes256Gcm::new(key.as_bytes().into())
                .encrypt(n.into(), payload)
                .map_err(|_| CryptoError::EncryptionFailed("AES-256-GCM failed".to_string())),
            _ => Err(self.nonce_mismatch(nonce)),
        }
    }

    /// Decrypt ciphertext with associated data
    ///
    /// Any tag mismatch, whether from a wrong key, wrong associated data or
    /// modified bytes, is reported as [`CryptoError::AuthenticationFailed`].
    pub fn open(
        &self,
        key: &AeadKey,
        nonce: &Nonce,
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let payload = Payload { msg: ciphertext, aad };
        match (self.algorithm, nonce) {
            (AeadAlgorithm::XChaCha20Poly1305, Nonce::XChaCha(n)) => {
                XChaCha20Poly1305::new(key.as_bytes().into())
                    .decrypt(n.into(), payload)
                    .map_err(|_| CryptoError::AuthenticationFailed)
            }
            (AeadAlgorithm::Aes256Gcm, Nonce::AesGcm(n)) => Aes256Gcm::new(key.as_bytes().into())
                .decrypt(n.into(), payload)
                .map_err(|_| CryptoError::AuthenticationFailed),
            _ => Err(self.nonce_mismatch(nonce)),
        }
    }

    fn nonce_mismatch(&self, nonce: &Nonce) -> CryptoError {
        CryptoError::InvalidNonceLength {
            expected: self.algorithm.nonce_size(),
            actual: nonce.as_bytes().len(),
        }
    }
}

impl Default for Aead {
    fn default() -> Self {
        Self::new()
    }
}
