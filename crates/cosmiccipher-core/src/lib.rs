//! # CosmicCipher Engine
//!
//! Identity and session protocol engine built on `cosmiccipher-crypto`.
//!
//! ## Features
//!
//! - **Identity store**: one long-term Ed25519 + X25519 identity per handle
//! - **Export/import**: Argon2id-protected, self-describing identity blobs
//! - **Prekey bundles**: signed, single-use prekeys for asynchronous bootstrap
//! - **DH-KEX**: symmetric two-phase handshake with mutual static authentication
//! - **Session channel**: directional AEAD keys, counter nonces, anti-replay window
//!
//! ## Example
//!
//! ```
//! use cosmiccipher_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::insecure_fast()).unwrap();
//! engine.new_user("alice").unwrap();
//! engine.new_user("bob").unwrap();
//!
//! let to_alice = engine.init_dh_kex("bob", "alice").unwrap();
//! let to_bob = engine.init_dh_kex("alice", "bob").unwrap();
//! engine.finalize_dh_kex("bob", "alice", &to_bob).unwrap();
//! engine.finalize_dh_kex("alice", "bob", &to_alice).unwrap();
//!
//! let ciphertext = engine.encrypt("bob", "alice", b"Hello Alice!").unwrap();
//! assert_eq!(engine.decrypt("alice", "bob", &ciphertext).unwrap(), b"Hello Alice!");
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod bundle;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod identity;
pub mod kex;
pub mod session;
pub mod types;
pub mod wire;

pub use config::EngineConfig;
pub use engine::{Engine, SharedEngine};
pub use error::{EngineError, Result};
pub use identity::{Identity, IdentityStore, SharedIdentity};
pub use types::{HandshakeState, IdentityInfo, Role, SessionKeyFingerprints, UserHandle};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::Engine;
    pub use crate::error::{EngineError, Result};
    pub use crate::types::{HandshakeState, UserHandle};
    pub use crate::wire::{from_base64, to_base64};
}
