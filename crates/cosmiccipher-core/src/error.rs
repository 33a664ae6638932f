//! Error types for the CosmicCipher engine

use cosmiccipher_crypto::CryptoError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
///
/// Every variant is recoverable by the caller: a failing operation leaves the
/// identity store and all sessions exactly as they were. Failures on untrusted
/// input carry no detail that would tell a wrong key apart from corrupted data.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown handle
    #[error("User not found: {0}")]
    NotFound(String),

    /// Handle already registered
    #[error("User already exists: {0}")]
    AlreadyExists(String),

    /// Export blob failed authentication or could not be parsed
    #[error("Identity import failed")]
    ImportFailed,

    /// Prekey bundle failed verification or could not be parsed
    #[error("Invalid prekey bundle")]
    InvalidBundle,

    /// Handshake packet does not fit the local handshake state
    #[error("Handshake mismatch")]
    HandshakeMismatch,

    /// No established session for the pair
    #[error("No established session between {local} and {peer}")]
    NoSession { local: String, peer: String },

    /// Ciphertext failed authentication or replay checks
    #[error("Message authentication failed")]
    AuthenticationFailed,

    /// Send counter exhausted for the session keys, re-handshake required
    #[error("Nonce space exhausted, re-handshake required")]
    NonceExhausted,

    /// Plaintext exceeds the configured limit
    #[error("Message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local cryptographic failure (randomness, key schedule, encoding)
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl EngineError {
    pub(crate) fn no_session(local: &str, peer: &str) -> Self {
        EngineError::NoSession {
            local: local.to_string(),
            peer: peer.to_string(),
        }
    }
}
