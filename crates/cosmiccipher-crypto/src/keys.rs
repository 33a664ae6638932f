//! Key types for the CosmicCipher protocol
//!
//! This module provides the fundamental key types used throughout the engine:
//! - Signing keys (long-term Ed25519, authenticate bundles and handshake packets)
//! - Key-agreement keys (X25519, static identity keys, prekeys and ephemerals)
//! - Shared secrets produced by Diffie-Hellman
//!
//! All randomness is drawn from the operating system generator. A failing
//! generator is reported as [`CryptoError::RngFailed`] and is never retried.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, Result};
use crate::kdf::domain;

/// Size of X25519 and Ed25519 public keys in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of X25519 and Ed25519 secret keys in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of Ed25519 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// Fill an array from the operating system generator
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| CryptoError::RngFailed)?;
    Ok(bytes)
}

/// An X25519 key pair for Diffie-Hellman key agreement
///
/// Used for the long-term static identity key, for published prekeys and for
/// per-handshake ephemerals. The secret half zeroizes itself on drop.
pub struct AgreementKeyPair {
    secret: X25519StaticSecret,
    public: X25519PublicKey,
}

impl AgreementKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self> {
        let mut seed = random_bytes::<SECRET_KEY_SIZE>()?;
        let pair = Self::from_secret_bytes(seed);
        seed.zeroize();
        Ok(pair)
    }

    /// Create from existing secret bytes
    ///
    /// # Security
    /// The input bytes should come from a secure random source
    pub fn from_secret_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        let secret = X25519StaticSecret::from(bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(*self.public.as_bytes())
    }

    /// Perform X25519 Diffie-Hellman with a remote public key
    ///
    /// Low-order remote points yield an all-zero output; those are rejected so
    /// a malicious peer cannot force a predictable shared secret.
    pub fn diffie_hellman(&self, their_public: &PublicKeyBytes) -> Result<SharedSecret> {
        let shared = self.secret.diffie_hellman(&their_public.to_x25519());
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey(
                "Non-contributory X25519 public key".to_string(),
            ));
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }

    /// Get the secret key bytes
    ///
    /// # Security Warning
    /// Only used to build encrypted identity exports.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }
}

impl Clone for AgreementKeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.to_bytes())
    }
}

/// An Ed25519 key pair for authenticating published material
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self> {
        let mut seed = random_bytes::<SECRET_KEY_SIZE>()?;
        let pair = Self::from_secret_bytes(&seed);
        seed.zeroize();
        Ok(pair)
    }

    /// Create from an existing 32-byte seed
    pub fn from_secret_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Get the verifying key
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Get the seed bytes (for encrypted export only)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_SIZE]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }
}

impl Clone for SigningKeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(&self.signing_key.to_bytes())
    }
}

/// Verify an Ed25519 signature made by `public_key` over `message`
///
/// Uses strict verification, so malleable and small-order encodings fail.
pub fn verify_signature(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey("Invalid Ed25519 public key".to_string()))?;
    let signature = Signature::from_slice(signature).map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// A shared secret derived from Diffie-Hellman key exchange
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub(crate) [u8; 32]);

impl SharedSecret {
    /// Get the secret bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A serializable 32-byte public key (X25519 or Ed25519)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKeyBytes(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKeyBytes {
    /// Convert to an X25519 public key
    pub fn to_x25519(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Full hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKeyBytes {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Fingerprint of an identity's public key material
///
/// SHA-256 over a domain label, the signing key and the key-agreement key.
pub fn identity_fingerprint(signing: &PublicKeyBytes, agreement: &PublicKeyBytes) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain::FINGERPRINT);
    hasher.update(signing.as_bytes());
    hasher.update(agreement.as_bytes());
    hasher.finalize().into()
}
