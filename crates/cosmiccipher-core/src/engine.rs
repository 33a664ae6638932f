//! The engine context object
//!
//! [`Engine`] owns an [`IdentityStore`] and the configuration and exposes every
//! operation of the identity and session protocol. Independent engines share
//! nothing, so tests can run any number side by side.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bundle;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::export::{self, ExportBlob};
use crate::identity::{Identity, IdentityStore, SharedIdentity};
use crate::kex;
use crate::session::{Session, SessionPhase};
use crate::types::{HandshakeState, IdentityInfo, SessionKeyFingerprints, UserHandle};

/// Identity and session protocol engine
pub struct Engine {
    config: EngineConfig,
    store: IdentityStore,
}

impl Engine {
    /// Create an engine after validating `config`
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: IdentityStore::new(),
        })
    }

    /// Create an engine with the default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: EngineConfig::default(),
            store: IdentityStore::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying identity store
    pub fn store(&self) -> &IdentityStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Identity store
    // ------------------------------------------------------------------

    /// Create a fresh identity for `handle`
    pub fn new_user(&self, handle: &str) -> Result<()> {
        if self.store.contains(handle) {
            return Err(EngineError::AlreadyExists(handle.to_string()));
        }
        // Key generation happens outside the map lock; insert re-checks
        let identity = Identity::generate(handle.into())?;
        let fingerprint = hex::encode(&identity.fingerprint()[..8]);
        self.store.insert(identity)?;
        info!("Created user {} (fingerprint {})", handle, fingerprint);
        Ok(())
    }

    /// Delete an identity and all of its sessions
    pub fn delete_user(&self, handle: &str) -> Result<()> {
        self.store.remove(handle)?;
        info!("Deleted user {}", handle);
        Ok(())
    }

    /// Resolve a handle
    pub fn lookup(&self, handle: &str) -> Result<SharedIdentity> {
        self.store.lookup(handle)
    }

    /// Public summary of an identity
    pub fn identity_info(&self, handle: &str) -> Result<IdentityInfo> {
        Ok(self.store.lookup(handle)?.lock().info())
    }

    /// Registered handles, sorted
    pub fn list_users(&self) -> Vec<UserHandle> {
        self.store.handles()
    }

    // ------------------------------------------------------------------
    // Export / import
    // ------------------------------------------------------------------

    /// Export an identity and its sessions under `password`
    ///
    /// Runs Argon2id after releasing the identity lock.
    pub fn export_user(&self, handle: &str, password: &str) -> Result<Vec<u8>> {
        let shared = self.store.lookup(handle)?;
        let snapshot = {
            let identity = shared.lock();
            export::snapshot(&identity)?
        };
        let blob = export::seal(&snapshot, password.as_bytes(), &self.config.password_kdf)?;
        info!("Exported user {} ({} bytes)", handle, blob.len());
        Ok(blob)
    }

    /// Import an exported identity under `handle`
    ///
    /// Registration is atomic: on any failure the store is unchanged.
    pub fn import_user(&self, handle: &str, password: &str, blob: &[u8]) -> Result<()> {
        let blob = ExportBlob::parse(blob)?;
        if blob.kdf.validate().is_err() || !blob.kdf.within(&self.config.max_import_kdf) {
            warn!("Rejected export blob for {}: KDF parameters out of bounds", handle);
            return Err(EngineError::ImportFailed);
        }
        if self.store.contains(handle) {
            return Err(EngineError::AlreadyExists(handle.to_string()));
        }

        let identity = export::open(&blob, password.as_bytes(), handle.into())?;
        let sessions = identity.sessions.len();
        self.store.insert(identity)?;
        info!("Imported user {} with {} sessions", handle, sessions);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prekey bundles
    // ------------------------------------------------------------------

    /// Generate a signed prekey bundle for `handle`
    pub fn generate_instance(&self, handle: &str) -> Result<Vec<u8>> {
        let shared = self.store.lookup(handle)?;
        let mut identity = shared.lock();
        bundle::generate(&mut identity, self.config.prekeys_per_bundle)
    }

    /// Verify a peer's bundle and pin it on `handle`'s side
    pub fn import_instance(&self, handle: &str, bundle: &[u8]) -> Result<()> {
        let shared = self.store.lookup(handle)?;
        let mut identity = shared.lock();
        let owner = bundle::pin(&mut identity, bundle)?;
        info!("{} imported bundle of {}", handle, owner);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    /// Start a handshake from `local` to `peer`
    pub fn init_dh_kex(&self, local: &str, peer: &str) -> Result<Vec<u8>> {
        let shared = self.store.lookup(local)?;
        let mut identity = shared.lock();
        kex::init(&mut identity, &peer.into())
    }

    /// Complete the handshake with the packet `peer` produced
    pub fn finalize_dh_kex(&self, local: &str, peer: &str, packet: &[u8]) -> Result<()> {
        let shared = self.store.lookup(local)?;
        let mut identity = shared.lock();
        kex::finalize(&mut identity, &peer.into(), packet).map_err(|e| {
            debug!("{} rejected handshake packet from {}: {}", local, peer, e);
            e
        })?;
        Ok(())
    }

    /// Handshake state of the (local, peer) session
    pub fn session_state(&self, local: &str, peer: &str) -> Result<HandshakeState> {
        Ok(self.store.lookup(local)?.lock().session_state(peer))
    }

    /// Discard the (local, peer) session, keys included
    pub fn reset_session(&self, local: &str, peer: &str) -> Result<()> {
        let shared = self.store.lookup(local)?;
        let mut identity = shared.lock();
        if let Some(session) = identity.sessions.get_mut(peer) {
            session.phase = SessionPhase::Idle;
            info!("{} reset session with {}", local, peer);
        }
        Ok(())
    }

    /// Fingerprints of the (local, peer) traffic keys
    pub fn session_key_fingerprints(
        &self,
        local: &str,
        peer: &str,
    ) -> Result<SessionKeyFingerprints> {
        let shared = self.store.lookup(local)?;
        let identity = shared.lock();
        identity
            .sessions
            .get(peer)
            .and_then(Session::channel)
            .map(|channel| channel.fingerprints())
            .ok_or_else(|| EngineError::no_session(local, peer))
    }

    // ------------------------------------------------------------------
    // Session channel
    // ------------------------------------------------------------------

    /// Encrypt `plaintext` from `local` to `peer`
    pub fn encrypt(&self, local: &str, peer: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > self.config.max_message_size {
            return Err(EngineError::MessageTooLarge {
                size: plaintext.len(),
                max: self.config.max_message_size,
            });
        }
        let shared = self.store.lookup(local)?;
        let mut identity = shared.lock();
        identity
            .sessions
            .get_mut(peer)
            .and_then(Session::channel_mut)
            .ok_or_else(|| EngineError::no_session(local, peer))?
            .seal(self.config.session_cipher, plaintext)
    }

    /// Decrypt a ciphertext `peer` sent to `local`
    pub fn decrypt(&self, local: &str, peer: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let shared = self.store.lookup(local)?;
        let mut identity = shared.lock();
        identity
            .sessions
            .get_mut(peer)
            .and_then(Session::channel_mut)
            .ok_or_else(|| EngineError::no_session(local, peer))?
            .open(self.config.session_cipher, ciphertext)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Engine shared across threads
pub type SharedEngine = Arc<Engine>;
