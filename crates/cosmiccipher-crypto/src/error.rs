//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Nonce does not belong to the selected algorithm
    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Nonce length of the selected algorithm
        expected: usize,
        /// Length of the nonce that was supplied
        actual: usize,
    },

    /// Invalid signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Invalid public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Authentication failed (tag mismatch, wrong key or wrong associated data)
    #[error("Message authentication failed")]
    AuthenticationFailed,

    /// Password-based key derivation rejected its parameters or failed
    #[error("Password key derivation failed: {0}")]
    PasswordKdf(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Random number generation failed
    #[error("Random number generation failed")]
    RngFailed,
}

impl From<bincode::Error> for CryptoError {
    fn from(err: bincode::Error) -> Self {
        CryptoError::Serialization(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        CryptoError::InvalidSignature
    }
}

impl From<argon2::Error> for CryptoError {
    fn from(err: argon2::Error) -> Self {
        CryptoError::PasswordKdf(err.to_string())
    }
}
