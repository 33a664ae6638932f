//! # CosmicCipher Cryptographic Library
//!
//! Stateless building blocks for the CosmicCipher identity and session engine.
//! Nothing in this crate owns long-lived state; the engine crate composes these
//! primitives into identities, handshakes and session channels.
//!
//! ## Suite
//!
//! - **Signing**: Ed25519, verified with `verify_strict`
//! - **Key agreement**: X25519, non-contributory results rejected
//! - **Key schedule**: HKDF-SHA-512 with domain-separation labels
//! - **AEAD**: XChaCha20-Poly1305 (default) or AES-256-GCM
//! - **Password KDF**: Argon2id for exported identities
//!
//! ## Core Components
//!
//! - [`keys`]: Signing and key-agreement key pairs, shared secrets, randomness
//! - [`kdf`]: HKDF contexts and the directional session key schedule
//! - [`aead`]: Authenticated encryption with explicit nonces
//! - [`password`]: Memory-hard password-based key derivation

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod password;

pub use error::{CryptoError, Result};

/// Identifier of the primitive suite (X25519 / Ed25519 / HKDF-SHA-512).
///
/// Carried in every bundle and handshake packet so peers built against a
/// different suite reject the payload instead of misinterpreting it.
pub const SUITE_ID: u8 = 1;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::aead::{Aead, AeadAlgorithm, AeadKey, Nonce};
    pub use crate::error::{CryptoError, Result};
    pub use crate::kdf::{derive_directional_keys, DirectionalKeys, KeyDerivationContext};
    pub use crate::keys::{AgreementKeyPair, PublicKeyBytes, SharedSecret, SigningKeyPair};
    pub use crate::password::PasswordKdfParams;
}
