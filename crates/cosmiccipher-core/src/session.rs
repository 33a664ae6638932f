//! Session records and the established session channel
//!
//! A session is keyed by the peer handle inside the local identity. Once the
//! handshake completes it carries a [`Channel`]: one key per direction, a send
//! counter that doubles as the AEAD nonce and a sliding anti-replay window on
//! the receive side.

use cosmiccipher_crypto::aead::{Aead, AeadAlgorithm, AeadKey, Nonce};
use cosmiccipher_crypto::kdf::{constant_time_eq, context_label, key_fingerprint, SESSION_ID_SIZE};
use cosmiccipher_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::kex::{PendingHandshake, TOKEN_SIZE};
use crate::types::{HandshakeState, Role, SessionKeyFingerprints, UserHandle};
use crate::wire::{self, PayloadKind};

/// Number of counters tracked behind the highest one received
pub const REPLAY_WINDOW_SIZE: u64 = 64;

/// Handshake phase of a session record
pub(crate) enum SessionPhase {
    /// Reset, or restored without any attempt in flight
    Idle,
    /// Waiting for the peer's packet
    Initiated(PendingHandshake),
    /// Keys derived
    Established(Channel),
}

/// Per-peer session record
pub(crate) struct Session {
    pub(crate) phase: SessionPhase,
    /// Token of the peer packet that produced the last established channel
    pub(crate) previous_peer_token: Option<[u8; TOKEN_SIZE]>,
}

impl Session {
    pub(crate) fn state(&self) -> HandshakeState {
        match self.phase {
            SessionPhase::Idle => HandshakeState::None,
            SessionPhase::Initiated(_) => HandshakeState::Initiated,
            SessionPhase::Established(_) => HandshakeState::Established,
        }
    }

    pub(crate) fn channel(&self) -> Option<&Channel> {
        match &self.phase {
            SessionPhase::Established(channel) => Some(channel),
            _ => None,
        }
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut Channel> {
        match &mut self.phase {
            SessionPhase::Established(channel) => Some(channel),
            _ => None,
        }
    }
}

/// Sliding anti-replay window
///
/// Bit `n` of `bitmap` records whether counter `highest - n` was accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayWindow {
    highest: Option<u64>,
    bitmap: u64,
}

impl ReplayWindow {
    /// Whether `counter` may still be accepted
    pub fn check(&self, counter: u64) -> bool {
        match self.highest {
            None => true,
            Some(highest) if counter > highest => true,
            Some(highest) => {
                let age = highest - counter;
                age < REPLAY_WINDOW_SIZE && self.bitmap & (1u64 << age) == 0
            }
        }
    }

    /// Record an authenticated counter
    pub fn update(&mut self, counter: u64) {
        match self.highest {
            None => {
                self.highest = Some(counter);
                self.bitmap = 1;
            }
            Some(highest) if counter > highest => {
                let shift = counter - highest;
                self.bitmap = if shift >= REPLAY_WINDOW_SIZE {
                    0
                } else {
                    self.bitmap << shift
                };
                self.bitmap |= 1;
                self.highest = Some(counter);
            }
            Some(highest) => {
                let age = highest - counter;
                if age < REPLAY_WINDOW_SIZE {
                    self.bitmap |= 1u64 << age;
                }
            }
        }
    }

    /// Highest counter accepted so far
    pub fn highest(&self) -> Option<u64> {
        self.highest
    }

    pub(crate) fn from_parts(highest: Option<u64>, bitmap: u64) -> Self {
        Self { highest, bitmap }
    }

    pub(crate) fn bitmap(&self) -> u64 {
        self.bitmap
    }
}

/// Ciphertext payload body
#[derive(Serialize, Deserialize)]
struct CiphertextBody {
    session_id: [u8; SESSION_ID_SIZE],
    counter: u64,
    algorithm: AeadAlgorithm,
    ciphertext: Vec<u8>,
}

/// Established session channel
pub(crate) struct Channel {
    pub(crate) role: Role,
    pub(crate) session_id: [u8; SESSION_ID_SIZE],
    pub(crate) send_key: AeadKey,
    pub(crate) recv_key: AeadKey,
    /// Next counter to send
    pub(crate) send_counter: u64,
    pub(crate) replay: ReplayWindow,
    /// Handles as bound by the handshake, used in associated data
    pub(crate) local: UserHandle,
    pub(crate) peer: UserHandle,
    pub(crate) local_token: [u8; TOKEN_SIZE],
    pub(crate) peer_token: [u8; TOKEN_SIZE],
    pub(crate) established_at: i64,
}

impl Channel {
    /// Encrypt one message under the send key
    pub(crate) fn seal(&mut self, algorithm: AeadAlgorithm, plaintext: &[u8]) -> Result<Vec<u8>> {
        // u64::MAX is never used as a nonce
        if self.send_counter == u64::MAX {
            return Err(EngineError::NonceExhausted);
        }
        let counter = self.send_counter;

        let nonce = Nonce::from_counter(algorithm, counter);
        let aad = self.associated_data(algorithm, counter, &self.local, &self.peer);
        let ciphertext =
            Aead::with_algorithm(algorithm).seal(&self.send_key, &nonce, plaintext, &aad)?;

        let body = CiphertextBody {
            session_id: self.session_id,
            counter,
            algorithm,
            ciphertext,
        };
        let bytes = wire::encode(PayloadKind::Ciphertext, &body).map_err(CryptoError::from)?;

        self.send_counter += 1;
        Ok(bytes)
    }

    /// Authenticate and decrypt one message under the receive key
    ///
    /// Only `algorithm`, the locally configured cipher, is accepted; the tag in
    /// the body must match it. The replay window is consulted before and
    /// updated only after the tag verifies. Every rejection is
    /// [`EngineError::AuthenticationFailed`].
    pub(crate) fn open(&mut self, algorithm: AeadAlgorithm, bytes: &[u8]) -> Result<Vec<u8>> {
        let body: CiphertextBody = wire::decode(PayloadKind::Ciphertext, bytes)
            .map_err(|_| EngineError::AuthenticationFailed)?;

        if !constant_time_eq(&body.session_id, &self.session_id) {
            return Err(EngineError::AuthenticationFailed);
        }
        if body.algorithm != algorithm {
            warn!(
                "Rejected {:?} ciphertext from {}",
                body.algorithm, self.peer
            );
            return Err(EngineError::AuthenticationFailed);
        }
        if !self.replay.check(body.counter) {
            warn!(
                "Rejected replayed or stale counter {} from {}",
                body.counter, self.peer
            );
            return Err(EngineError::AuthenticationFailed);
        }

        let nonce = Nonce::from_counter(algorithm, body.counter);
        let aad = self.associated_data(algorithm, body.counter, &self.peer, &self.local);
        let plaintext = Aead::with_algorithm(algorithm)
            .open(&self.recv_key, &nonce, &body.ciphertext, &aad)
            .map_err(|_| EngineError::AuthenticationFailed)?;

        self.replay.update(body.counter);
        Ok(plaintext)
    }

    pub(crate) fn fingerprints(&self) -> SessionKeyFingerprints {
        SessionKeyFingerprints {
            send: hex::encode(key_fingerprint(&self.send_key)),
            receive: hex::encode(key_fingerprint(&self.recv_key)),
        }
    }

    fn associated_data(
        &self,
        algorithm: AeadAlgorithm,
        counter: u64,
        sender: &UserHandle,
        recipient: &UserHandle,
    ) -> Vec<u8> {
        let mut aad = Vec::with_capacity(64);
        aad.extend_from_slice(&PayloadKind::Ciphertext.header());
        aad.extend_from_slice(&self.session_id);
        aad.extend_from_slice(&counter.to_be_bytes());
        aad.push(algorithm.tag());
        aad.extend_from_slice(&context_label(&[sender.as_bytes(), recipient.as_bytes()]));
        aad
    }
}
