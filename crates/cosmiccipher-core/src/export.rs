//! Password-protected identity export
//!
//! The blob is an envelope around the Argon2id parameters, a random salt, an
//! XChaCha20-Poly1305 nonce and the sealed snapshot. Parameters, salt and nonce
//! are bound as associated data, so an importer needs only the password and
//! any modification fails authentication the same way a wrong password does.

use cosmiccipher_crypto::aead::{Aead, AeadAlgorithm, AeadKey, Nonce, XCHACHA_NONCE_SIZE};
use cosmiccipher_crypto::kdf::SESSION_ID_SIZE;
use cosmiccipher_crypto::keys::{
    random_bytes, AgreementKeyPair, PublicKeyBytes, SigningKeyPair, SECRET_KEY_SIZE,
};
use cosmiccipher_crypto::password::{self, PasswordKdfParams, SALT_SIZE};
use cosmiccipher_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::bundle::{PinnedBundle, PrekeyRef, ReservedPrekey, BUNDLE_ID_SIZE};
use crate::error::{EngineError, Result};
use crate::identity::Identity;
use crate::kex::{PendingHandshake, TOKEN_SIZE};
use crate::session::{Channel, ReplayWindow, Session, SessionPhase};
use crate::types::{Role, UserHandle};
use crate::wire::{self, PayloadKind};

/// Parsed export blob
#[derive(Serialize, Deserialize)]
pub(crate) struct ExportBlob {
    pub(crate) kdf: PasswordKdfParams,
    salt: [u8; SALT_SIZE],
    nonce: [u8; XCHACHA_NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl ExportBlob {
    /// Parse the envelope; any failure is [`EngineError::ImportFailed`]
    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        wire::decode(PayloadKind::ExportBlob, bytes).map_err(|_| EngineError::ImportFailed)
    }

    fn associated_data(kdf: &PasswordKdfParams, salt: &[u8], nonce: &[u8]) -> Vec<u8> {
        let mut aad = Vec::with_capacity(4 + 12 + SALT_SIZE + XCHACHA_NONCE_SIZE);
        aad.extend_from_slice(&PayloadKind::ExportBlob.header());
        aad.extend_from_slice(&kdf.to_bytes());
        aad.extend_from_slice(salt);
        aad.extend_from_slice(nonce);
        aad
    }
}

#[derive(Serialize, Deserialize)]
struct PrekeySnapshot {
    bundle_id: [u8; BUNDLE_ID_SIZE],
    prekey_id: u32,
    secret: [u8; SECRET_KEY_SIZE],
    consumed: bool,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
enum PhaseSnapshot {
    Idle,
    Initiated {
        token: [u8; TOKEN_SIZE],
        ephemeral_secret: [u8; SECRET_KEY_SIZE],
        peer_prekey: Option<(PrekeyRef, PublicKeyBytes)>,
        started_at: i64,
    },
    Established {
        role: Role,
        session_id: [u8; SESSION_ID_SIZE],
        send_key: [u8; 32],
        recv_key: [u8; 32],
        send_counter: u64,
        replay_highest: Option<u64>,
        replay_bitmap: u64,
        local: UserHandle,
        peer: UserHandle,
        local_token: [u8; TOKEN_SIZE],
        peer_token: [u8; TOKEN_SIZE],
        established_at: i64,
    },
}

#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    phase: PhaseSnapshot,
    previous_peer_token: Option<[u8; TOKEN_SIZE]>,
}

/// Everything needed to rebuild an identity, secrets included
#[derive(Serialize, Deserialize)]
struct IdentitySnapshot {
    signing_secret: [u8; SECRET_KEY_SIZE],
    agreement_secret: [u8; SECRET_KEY_SIZE],
    created_at: i64,
    next_prekey_id: u32,
    prekeys: Vec<PrekeySnapshot>,
    pinned: Vec<(UserHandle, PinnedBundle)>,
    sessions: Vec<(UserHandle, SessionSnapshot)>,
}

impl Drop for IdentitySnapshot {
    fn drop(&mut self) {
        self.signing_secret.zeroize();
        self.agreement_secret.zeroize();
        for prekey in &mut self.prekeys {
            prekey.secret.zeroize();
        }
        for (_, session) in &mut self.sessions {
            match &mut session.phase {
                PhaseSnapshot::Initiated { ephemeral_secret, .. } => ephemeral_secret.zeroize(),
                PhaseSnapshot::Established { send_key, recv_key, .. } => {
                    send_key.zeroize();
                    recv_key.zeroize();
                }
                PhaseSnapshot::Idle => {}
            }
        }
    }
}

impl IdentitySnapshot {
    fn capture(identity: &Identity) -> Self {
        let prekeys = identity
            .prekeys
            .iter()
            .map(|p| PrekeySnapshot {
                bundle_id: p.bundle_id,
                prekey_id: p.prekey_id,
                secret: *p.key.secret_bytes(),
                consumed: p.consumed,
                created_at: p.created_at,
            })
            .collect();

        let mut pinned: Vec<_> = identity
            .pinned
            .iter()
            .map(|(owner, bundle)| (owner.clone(), bundle.clone()))
            .collect();
        pinned.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sessions: Vec<_> = identity
            .sessions
            .iter()
            .map(|(peer, session)| (peer.clone(), capture_session(session)))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            signing_secret: *identity.signing().secret_bytes(),
            agreement_secret: *identity.agreement().secret_bytes(),
            created_at: identity.created_at,
            next_prekey_id: identity.next_prekey_id,
            prekeys,
            pinned,
            sessions,
        }
    }

    fn restore(&self, handle: UserHandle) -> Identity {
        let mut identity = Identity::from_keys(
            handle,
            SigningKeyPair::from_secret_bytes(&self.signing_secret),
            AgreementKeyPair::from_secret_bytes(self.agreement_secret),
            self.created_at,
        );
        identity.next_prekey_id = self.next_prekey_id;
        identity.prekeys = self
            .prekeys
            .iter()
            .map(|p| ReservedPrekey {
                bundle_id: p.bundle_id,
                prekey_id: p.prekey_id,
                key: AgreementKeyPair::from_secret_bytes(p.secret),
                consumed: p.consumed,
                created_at: p.created_at,
            })
            .collect();
        identity.pinned = self.pinned.iter().cloned().collect();
        identity.sessions = self
            .sessions
            .iter()
            .map(|(peer, session)| (peer.clone(), restore_session(session)))
            .collect();
        identity
    }
}

fn capture_session(session: &Session) -> SessionSnapshot {
    let phase = match &session.phase {
        SessionPhase::Idle => PhaseSnapshot::Idle,
        SessionPhase::Initiated(pending) => PhaseSnapshot::Initiated {
            token: pending.token,
            ephemeral_secret: *pending.ephemeral.secret_bytes(),
            peer_prekey: pending.peer_prekey.clone(),
            started_at: pending.started_at,
        },
        SessionPhase::Established(channel) => PhaseSnapshot::Established {
            role: channel.role,
            session_id: channel.session_id,
            send_key: *channel.send_key.as_bytes(),
            recv_key: *channel.recv_key.as_bytes(),
            send_counter: channel.send_counter,
            replay_highest: channel.replay.highest(),
            replay_bitmap: channel.replay.bitmap(),
            local: channel.local.clone(),
            peer: channel.peer.clone(),
            local_token: channel.local_token,
            peer_token: channel.peer_token,
            established_at: channel.established_at,
        },
    };
    SessionSnapshot {
        phase,
        previous_peer_token: session.previous_peer_token,
    }
}

fn restore_session(snapshot: &SessionSnapshot) -> Session {
    let phase = match &snapshot.phase {
        PhaseSnapshot::Idle => SessionPhase::Idle,
        PhaseSnapshot::Initiated {
            token,
            ephemeral_secret,
            peer_prekey,
            started_at,
        } => SessionPhase::Initiated(PendingHandshake {
            token: *token,
            ephemeral: AgreementKeyPair::from_secret_bytes(*ephemeral_secret),
            peer_prekey: peer_prekey.clone(),
            started_at: *started_at,
        }),
        PhaseSnapshot::Established {
            role,
            session_id,
            send_key,
            recv_key,
            send_counter,
            replay_highest,
            replay_bitmap,
            local,
            peer,
            local_token,
            peer_token,
            established_at,
        } => SessionPhase::Established(Channel {
            role: *role,
            session_id: *session_id,
            send_key: AeadKey::from_bytes(*send_key),
            recv_key: AeadKey::from_bytes(*recv_key),
            send_counter: *send_counter,
            replay: ReplayWindow::from_parts(*replay_highest, *replay_bitmap),
            local: local.clone(),
            peer: peer.clone(),
            local_token: *local_token,
            peer_token: *peer_token,
            established_at: *established_at,
        }),
    };
    Session {
        phase,
        previous_peer_token: snapshot.previous_peer_token,
    }
}

/// Serialize an identity, secrets included, into zeroizing memory
///
/// Cheap; meant to run under the identity lock before [`seal`].
pub(crate) fn snapshot(identity: &Identity) -> Result<Zeroizing<Vec<u8>>> {
    let snapshot = IdentitySnapshot::capture(identity);
    let bytes = wire::to_canonical(&snapshot).map_err(CryptoError::from)?;
    Ok(Zeroizing::new(bytes))
}

/// Encrypt a snapshot under a password
///
/// Runs Argon2id; call without holding any lock.
pub(crate) fn seal(snapshot: &[u8], password: &[u8], kdf: &PasswordKdfParams) -> Result<Vec<u8>> {
    let salt = random_bytes::<SALT_SIZE>()?;
    let nonce = random_bytes::<XCHACHA_NONCE_SIZE>()?;
    let key = password::derive_key(password, &salt, kdf)?;

    let aad = ExportBlob::associated_data(kdf, &salt, &nonce);
    let ciphertext = Aead::with_algorithm(AeadAlgorithm::XChaCha20Poly1305).seal(
        &key,
        &Nonce::XChaCha(nonce),
        snapshot,
        &aad,
    )?;

    let blob = ExportBlob {
        kdf: *kdf,
        salt,
        nonce,
        ciphertext,
    };
    let bytes = wire::encode(PayloadKind::ExportBlob, &blob).map_err(CryptoError::from)?;
    Ok(bytes)
}

/// Decrypt a blob and rebuild the identity under `handle`
///
/// Runs Argon2id; call without holding any lock. Wrong password, tampering
/// and malformed content are all [`EngineError::ImportFailed`].
pub(crate) fn open(blob: &ExportBlob, password: &[u8], handle: UserHandle) -> Result<Identity> {
    let key = password::derive_key(password, &blob.salt, &blob.kdf)
        .map_err(|_| EngineError::ImportFailed)?;

    let aad = ExportBlob::associated_data(&blob.kdf, &blob.salt, &blob.nonce);
    let plaintext = Zeroizing::new(
        Aead::with_algorithm(AeadAlgorithm::XChaCha20Poly1305)
            .open(&key, &Nonce::XChaCha(blob.nonce), &blob.ciphertext, &aad)
            .map_err(|_| EngineError::ImportFailed)?,
    );

    let snapshot: IdentitySnapshot =
        wire::from_canonical(&plaintext).map_err(|_| EngineError::ImportFailed)?;
    Ok(snapshot.restore(handle))
}
