//! Identities and the in-process identity store

use cosmiccipher_crypto::keys::{
    identity_fingerprint, AgreementKeyPair, PublicKeyBytes, SigningKeyPair,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

use crate::bundle::{PinnedBundle, ReservedPrekey};
use crate::error::{EngineError, Result};
use crate::session::{Session, SessionPhase};
use crate::types::{now_millis, HandshakeState, IdentityInfo, UserHandle};

/// One user's long-term key material and per-peer state
///
/// Secret keys never leave this type except through an encrypted export.
pub struct Identity {
    pub(crate) handle: UserHandle,
    signing: SigningKeyPair,
    agreement: AgreementKeyPair,
    pub(crate) created_at: i64,
    /// Sessions keyed by peer handle
    pub(crate) sessions: HashMap<UserHandle, Session>,
    /// Own prekeys handed out in bundles
    pub(crate) prekeys: Vec<ReservedPrekey>,
    pub(crate) next_prekey_id: u32,
    /// Peer bundles keyed by owner handle
    pub(crate) pinned: HashMap<UserHandle, PinnedBundle>,
}

impl Identity {
    /// Generate a fresh identity with no sessions
    pub fn generate(handle: UserHandle) -> Result<Self> {
        Ok(Self::from_keys(
            handle,
            SigningKeyPair::generate()?,
            AgreementKeyPair::generate()?,
            now_millis(),
        ))
    }

    pub(crate) fn from_keys(
        handle: UserHandle,
        signing: SigningKeyPair,
        agreement: AgreementKeyPair,
        created_at: i64,
    ) -> Self {
        Self {
            handle,
            signing,
            agreement,
            created_at,
            sessions: HashMap::new(),
            prekeys: Vec::new(),
            next_prekey_id: 0,
            pinned: HashMap::new(),
        }
    }

    /// Handle this identity is registered under
    pub fn handle(&self) -> &UserHandle {
        &self.handle
    }

    /// Ed25519 verifying key
    pub fn signing_public(&self) -> PublicKeyBytes {
        self.signing.public_key()
    }

    /// X25519 static public key
    pub fn agreement_public(&self) -> PublicKeyBytes {
        self.agreement.public_key()
    }

    /// Fingerprint over both public keys
    pub fn fingerprint(&self) -> [u8; 32] {
        identity_fingerprint(&self.signing_public(), &self.agreement_public())
    }

    /// Handshake state of the session with `peer`
    pub fn session_state(&self, peer: &str) -> HandshakeState {
        self.sessions
            .get(peer)
            .map(Session::state)
            .unwrap_or_default()
    }

    /// Public summary
    pub fn info(&self) -> IdentityInfo {
        IdentityInfo {
            handle: self.handle.clone(),
            signing_key: self.signing_public().to_hex(),
            agreement_key: self.agreement_public().to_hex(),
            fingerprint: hex::encode(self.fingerprint()),
            created_at: self.created_at,
            sessions: self.sessions.len(),
            established_sessions: self
                .sessions
                .values()
                .filter(|s| matches!(s.phase, SessionPhase::Established(_)))
                .count(),
            reserved_prekeys: self.prekeys.len(),
            consumed_prekeys: self.prekeys.iter().filter(|p| p.consumed).count(),
            pinned_bundles: self.pinned.len(),
        }
    }

    pub(crate) fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    pub(crate) fn agreement(&self) -> &AgreementKeyPair {
        &self.agreement
    }
}

/// Identity shared between callers; the mutex is the unit of exclusion
pub type SharedIdentity = Arc<Mutex<Identity>>;

/// Process-local registry of identities
///
/// The map lock is held only long enough to resolve, insert or remove a
/// handle. Work on an identity happens under its own mutex, so operations on
/// different handles never wait on each other.
#[derive(Default)]
pub struct IdentityStore {
    identities: RwLock<HashMap<UserHandle, SharedIdentity>>,
}

impl IdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a handle
    pub fn lookup(&self, handle: &str) -> Result<SharedIdentity> {
        self.identities
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))
    }

    /// Register an identity under its own handle
    ///
    /// Fails with [`EngineError::AlreadyExists`] without replacing live state.
    pub fn insert(&self, identity: Identity) -> Result<SharedIdentity> {
        let mut identities = self.identities.write();
        if identities.contains_key(identity.handle()) {
            return Err(EngineError::AlreadyExists(identity.handle().to_string()));
        }
        let handle = identity.handle().clone();
        let shared = Arc::new(Mutex::new(identity));
        identities.insert(handle, Arc::clone(&shared));
        Ok(shared)
    }

    /// Remove a handle, returning its identity
    pub fn remove(&self, handle: &str) -> Result<SharedIdentity> {
        self.identities
            .write()
            .remove(handle)
            .ok_or_else(|| EngineError::NotFound(handle.to_string()))
    }

    /// Whether a handle is registered
    pub fn contains(&self, handle: &str) -> bool {
        self.identities.read().contains_key(handle)
    }

    /// Registered handles, sorted
    pub fn handles(&self) -> Vec<UserHandle> {
        let mut handles: Vec<UserHandle> = self.identities.read().keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.identities.read().is_empty()
    }
}
