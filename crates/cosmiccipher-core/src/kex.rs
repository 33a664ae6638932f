//! Two-phase DH key exchange
//!
//! Both sides call [`init`] and swap the resulting packets, then each calls
//! [`finalize`] with the other's packet. The protocol is symmetric: roles are
//! assigned afterwards by sorting `(static key, handle)`, the lower side being
//! the initiator.
//!
//! # Key schedule
//!
//! With `S` static keys, `E` ephemerals and `P` bundle prekeys:
//!
//! ```text
//! ikm = 0xFF*32
//!     ‖ DH(S_i, E_r) ‖ DH(E_i, S_r) ‖ DH(E_i, E_r)
//!     ‖ flag ‖ DH(E_i, P_r)      (P_r referenced by the initiator's packet)
//!     ‖ flag ‖ DH(E_r, P_i)      (P_i referenced by the responder's packet)
//! info = len-prefixed(initiator, responder, initiator token, responder token)
//! ```
//!
//! Static keys feed two of the three mandatory terms, so completing the
//! exchange requires the peer's static secret.

use cosmiccipher_crypto::kdf::{context_label, derive_directional_keys, domain, DirectionalKeys};
use cosmiccipher_crypto::keys::{random_bytes, verify_signature, AgreementKeyPair, PublicKeyBytes};
use cosmiccipher_crypto::{CryptoError, SUITE_ID};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::bundle::{self, PrekeyRef};
use crate::error::{EngineError, Result};
use crate::identity::Identity;
use crate::session::{Channel, ReplayWindow, Session, SessionPhase};
use crate::types::{now_millis, Role, UserHandle};
use crate::wire::{self, PayloadKind};

/// Handshake token length
pub const TOKEN_SIZE: usize = 16;

/// Prefix of the key-schedule input, separates it from plain DH output
const IKM_PREFIX: [u8; 32] = [0xFF; 32];

/// State kept between `init` and `finalize`
pub(crate) struct PendingHandshake {
    pub(crate) token: [u8; TOKEN_SIZE],
    pub(crate) ephemeral: AgreementKeyPair,
    /// Peer prekey referenced by our packet
    pub(crate) peer_prekey: Option<(PrekeyRef, PublicKeyBytes)>,
    pub(crate) started_at: i64,
}

#[derive(Serialize, Deserialize)]
struct PacketContents {
    suite: u8,
    sender: UserHandle,
    recipient: UserHandle,
    signing_key: PublicKeyBytes,
    static_key: PublicKeyBytes,
    ephemeral_key: PublicKeyBytes,
    #[serde(with = "hex::serde")]
    token: [u8; TOKEN_SIZE],
    prekey: Option<PrekeyRef>,
}

#[derive(Serialize, Deserialize)]
struct SignedPacket {
    contents: PacketContents,
    signature: Vec<u8>,
}

fn signed_message(contents: &PacketContents) -> std::result::Result<Vec<u8>, bincode::Error> {
    let mut message = Vec::new();
    message.extend_from_slice(domain::PACKET_SIGNATURE);
    message.extend_from_slice(&PayloadKind::KexPacket.header());
    message.extend_from_slice(&wire::to_canonical(contents)?);
    Ok(message)
}

/// Start a handshake attempt with `peer`
///
/// Replaces an idle or established session for the pair. A pending attempt
/// is kept: its packet may already be with the peer, so a second init fails
/// with [`EngineError::HandshakeMismatch`] until the session is reset.
pub(crate) fn init(identity: &mut Identity, peer: &UserHandle) -> Result<Vec<u8>> {
    if peer == identity.handle() {
        return Err(EngineError::HandshakeMismatch);
    }
    if let Some(SessionPhase::Initiated(_)) = identity.sessions.get(peer).map(|s| &s.phase) {
        warn!(
            "{} already has a pending handshake with {}",
            identity.handle(),
            peer
        );
        return Err(EngineError::HandshakeMismatch);
    }

    let ephemeral = AgreementKeyPair::generate()?;
    let token = random_bytes::<TOKEN_SIZE>()?;
    let peer_prekey = identity.pinned.get(peer).and_then(|p| p.next_unused());

    let contents = PacketContents {
        suite: SUITE_ID,
        sender: identity.handle().clone(),
        recipient: peer.clone(),
        signing_key: identity.signing_public(),
        static_key: identity.agreement_public(),
        ephemeral_key: ephemeral.public_key(),
        token,
        prekey: peer_prekey.as_ref().map(|(reference, _)| reference.clone()),
    };
    let message = signed_message(&contents).map_err(CryptoError::from)?;
    let signature = identity.signing().sign(&message).to_vec();
    let bytes = wire::encode(PayloadKind::KexPacket, &SignedPacket { contents, signature })
        .map_err(CryptoError::from)?;

    if let Some((reference, _)) = &peer_prekey {
        if let Some(pinned) = identity.pinned.get_mut(peer) {
            pinned.mark_used(reference.prekey_id);
        }
    }

    let previous = identity.sessions.remove(peer);
    if let Some(SessionPhase::Established(_)) = previous.as_ref().map(|s| &s.phase) {
        info!("{} superseding established session with {}", identity.handle(), peer);
    }
    identity.sessions.insert(
        peer.clone(),
        Session {
            phase: SessionPhase::Initiated(PendingHandshake {
                token,
                ephemeral,
                peer_prekey,
                started_at: now_millis(),
            }),
            previous_peer_token: previous.and_then(|s| s.previous_peer_token),
        },
    );

    debug!(
        "{} initiated handshake with {} (token {})",
        identity.handle(),
        peer,
        hex::encode(&token[..4])
    );
    Ok(bytes)
}

/// Complete the handshake with the peer's packet
///
/// Every rejection is [`EngineError::HandshakeMismatch`] and leaves the
/// identity untouched.
pub(crate) fn finalize(identity: &mut Identity, peer: &UserHandle, bytes: &[u8]) -> Result<Role> {
    let packet: SignedPacket =
        wire::decode(PayloadKind::KexPacket, bytes).map_err(|_| EngineError::HandshakeMismatch)?;
    let contents = packet.contents;

    if contents.suite != SUITE_ID {
        return Err(EngineError::HandshakeMismatch);
    }
    let message = signed_message(&contents).map_err(|_| EngineError::HandshakeMismatch)?;
    verify_signature(&contents.signing_key, &message, &packet.signature)
        .map_err(|_| EngineError::HandshakeMismatch)?;

    if contents.sender != *peer || contents.recipient != *identity.handle() {
        return Err(EngineError::HandshakeMismatch);
    }
    if contents.signing_key == identity.signing_public()
        || contents.static_key == identity.agreement_public()
    {
        return Err(EngineError::HandshakeMismatch);
    }
    if let Some(pinned) = identity.pinned.get(peer) {
        if pinned.signing_key != contents.signing_key || pinned.static_key != contents.static_key {
            return Err(EngineError::HandshakeMismatch);
        }
    }

    let session = identity
        .sessions
        .get(peer)
        .ok_or(EngineError::HandshakeMismatch)?;
    let pending = match &session.phase {
        SessionPhase::Initiated(pending) => pending,
        _ => return Err(EngineError::HandshakeMismatch),
    };
    if session.previous_peer_token == Some(contents.token) || contents.token == pending.token {
        return Err(EngineError::HandshakeMismatch);
    }

    let own_prekey = match &contents.prekey {
        Some(reference) => Some(
            bundle::find_unconsumed(identity, reference)
                .ok_or(EngineError::HandshakeMismatch)?
                .key
                .clone(),
        ),
        None => None,
    };

    let local_static = identity.agreement_public();
    let role = if (local_static, identity.handle()) < (contents.static_key, peer) {
        Role::Initiator
    } else {
        Role::Responder
    };

    let ikm = key_material(
        role,
        identity.agreement(),
        pending,
        own_prekey.as_ref(),
        &contents,
    )
    .map_err(|_| EngineError::HandshakeMismatch)?;

    let (initiator, responder, initiator_token, responder_token) = match role {
        Role::Initiator => (identity.handle(), peer, &pending.token, &contents.token),
        Role::Responder => (peer, identity.handle(), &contents.token, &pending.token),
    };
    let context = context_label(&[
        initiator.as_bytes(),
        responder.as_bytes(),
        &initiator_token[..],
        &responder_token[..],
    ]);
    let DirectionalKeys {
        initiator_to_responder,
        responder_to_initiator,
        session_id,
    } = derive_directional_keys(&ikm, &context)?;

    let (send_key, recv_key) = match role {
        Role::Initiator => (initiator_to_responder, responder_to_initiator),
        Role::Responder => (responder_to_initiator, initiator_to_responder),
    };
    let channel = Channel {
        role,
        session_id,
        send_key,
        recv_key,
        send_counter: 0,
        replay: ReplayWindow::default(),
        local: identity.handle().clone(),
        peer: peer.clone(),
        local_token: pending.token,
        peer_token: contents.token,
        established_at: now_millis(),
    };

    // Commit
    if let Some(reference) = &contents.prekey {
        bundle::consume(identity, reference);
    }
    identity.sessions.insert(
        peer.clone(),
        Session {
            phase: SessionPhase::Established(channel),
            previous_peer_token: Some(contents.token),
        },
    );

    info!(
        "{} established session with {} as {:?} (session {})",
        identity.handle(),
        peer,
        role,
        hex::encode(&session_id[..4])
    );
    Ok(role)
}

fn key_material(
    role: Role,
    static_key: &AgreementKeyPair,
    pending: &PendingHandshake,
    own_prekey: Option<&AgreementKeyPair>,
    packet: &PacketContents,
) -> std::result::Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(32 * 6 + 2));
    ikm.extend_from_slice(&IKM_PREFIX);

    let ephemeral = &pending.ephemeral;
    let peer_prekey = pending.peer_prekey.as_ref().map(|(_, public)| public);

    match role {
        Role::Initiator => {
            ikm.extend_from_slice(static_key.diffie_hellman(&packet.ephemeral_key)?.as_bytes());
            ikm.extend_from_slice(ephemeral.diffie_hellman(&packet.static_key)?.as_bytes());
            ikm.extend_from_slice(ephemeral.diffie_hellman(&packet.ephemeral_key)?.as_bytes());
            push_optional(&mut ikm, peer_prekey.map(|p| ephemeral.diffie_hellman(p)))?;
            push_optional(&mut ikm, own_prekey.map(|k| k.diffie_hellman(&packet.ephemeral_key)))?;
        }
        Role::Responder => {
            ikm.extend_from_slice(ephemeral.diffie_hellman(&packet.static_key)?.as_bytes());
            ikm.extend_from_slice(static_key.diffie_hellman(&packet.ephemeral_key)?.as_bytes());
            ikm.extend_from_slice(ephemeral.diffie_hellman(&packet.ephemeral_key)?.as_bytes());
            push_optional(&mut ikm, own_prekey.map(|k| k.diffie_hellman(&packet.ephemeral_key)))?;
            push_optional(&mut ikm, peer_prekey.map(|p| ephemeral.diffie_hellman(p)))?;
        }
    }
    Ok(ikm)
}

fn push_optional(
    ikm: &mut Vec<u8>,
    term: Option<std::result::Result<cosmiccipher_crypto::keys::SharedSecret, CryptoError>>,
) -> std::result::Result<(), CryptoError> {
    match term {
        Some(secret) => {
            ikm.push(1);
            ikm.extend_from_slice(secret?.as_bytes());
        }
        None => ikm.push(0),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HandshakeState;

    fn identity(handle: &str) -> Identity {
        Identity::generate(handle.into()).unwrap()
    }

    fn handshake(a: &mut Identity, b: &mut Identity) -> (Role, Role) {
        let (a_handle, b_handle) = (a.handle().clone(), b.handle().clone());
        let to_b = init(a, &b_handle).unwrap();
        let to_a = init(b, &a_handle).unwrap();
        let a_role = finalize(a, &b_handle, &to_a).unwrap();
        let b_role = finalize(b, &a_handle, &to_b).unwrap();
        (a_role, b_role)
    }

    fn channel<'a>(identity: &'a Identity, peer: &str) -> &'a Channel {
        identity.sessions.get(peer).and_then(Session::channel).unwrap()
    }

    #[test]
    fn test_symmetric_keys() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let (a_role, b_role) = handshake(&mut alice, &mut bob);
        assert_ne!(a_role, b_role);

        let a = channel(&alice, "bob");
        let b = channel(&bob, "alice");
        assert_eq!(a.send_key.as_bytes(), b.recv_key.as_bytes());
        assert_eq!(a.recv_key.as_bytes(), b.send_key.as_bytes());
        assert_ne!(a.send_key.as_bytes(), a.recv_key.as_bytes());
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn test_with_prekeys_both_ways() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let bob_bundle = bundle::generate(&mut bob, 2).unwrap();
        let alice_bundle = bundle::generate(&mut alice, 2).unwrap();
        bundle::pin(&mut alice, &bob_bundle).unwrap();
        bundle::pin(&mut bob, &alice_bundle).unwrap();

        handshake(&mut alice, &mut bob);

        let a = channel(&alice, "bob");
        let b = channel(&bob, "alice");
        assert_eq!(a.send_key.as_bytes(), b.recv_key.as_bytes());
        assert_eq!(alice.info().consumed_prekeys, 1);
        assert_eq!(bob.info().consumed_prekeys, 1);
        assert_eq!(alice.pinned["bob"].remaining(), 1);
    }

    #[test]
    fn test_finalize_without_init() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let packet = init(&mut bob, &"alice".into()).unwrap();

        assert!(matches!(
            finalize(&mut alice, &"bob".into(), &packet),
            Err(EngineError::HandshakeMismatch)
        ));
        assert_eq!(alice.session_state("bob"), HandshakeState::None);
    }

    #[test]
    fn test_wrong_sender_or_recipient() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let mut carol = identity("carol");
        init(&mut alice, &"bob".into()).unwrap();

        // Addressed to someone else
        let to_carol = init(&mut bob, &"carol".into()).unwrap();
        assert!(finalize(&mut alice, &"bob".into(), &to_carol).is_err());

        // Sent by someone other than the expected peer
        let from_carol = init(&mut carol, &"alice".into()).unwrap();
        assert!(finalize(&mut alice, &"bob".into(), &from_carol).is_err());
        assert_eq!(alice.session_state("bob"), HandshakeState::Initiated);
    }

    #[test]
    fn test_own_packet_reflected() {
        let mut alice = identity("alice");
        let packet = init(&mut alice, &"bob".into()).unwrap();
        assert!(finalize(&mut alice, &"bob".into(), &packet).is_err());
        assert!(init(&mut alice, &"alice".into()).is_err());
    }

    #[test]
    fn test_stale_packet_after_rehandshake() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        init(&mut alice, &"bob".into()).unwrap();
        let old = init(&mut bob, &"alice".into()).unwrap();
        finalize(&mut alice, &"bob".into(), &old).unwrap();

        init(&mut alice, &"bob".into()).unwrap();
        assert!(matches!(
            finalize(&mut alice, &"bob".into(), &old),
            Err(EngineError::HandshakeMismatch)
        ));
    }

    #[test]
    fn test_reinit_while_pending_keeps_attempt() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let to_bob = init(&mut alice, &"bob".into()).unwrap();
        let to_alice = init(&mut bob, &"alice".into()).unwrap();

        // to_bob is already in flight, so the pending attempt must survive
        assert!(matches!(
            init(&mut alice, &"bob".into()),
            Err(EngineError::HandshakeMismatch)
        ));
        assert_eq!(alice.session_state("bob"), HandshakeState::Initiated);

        finalize(&mut alice, &"bob".into(), &to_alice).unwrap();
        finalize(&mut bob, &"alice".into(), &to_bob).unwrap();

        let a = channel(&alice, "bob");
        let b = channel(&bob, "alice");
        assert_eq!(a.send_key.as_bytes(), b.recv_key.as_bytes());
        assert_eq!(a.recv_key.as_bytes(), b.send_key.as_bytes());
    }

    #[test]
    fn test_reinit_after_reset() {
        let mut alice = identity("alice");
        let first = init(&mut alice, &"bob".into()).unwrap();
        alice.sessions.get_mut("bob").unwrap().phase = SessionPhase::Idle;

        let second = init(&mut alice, &"bob".into()).unwrap();
        assert_ne!(first, second);
        assert_eq!(alice.session_state("bob"), HandshakeState::Initiated);
    }

    #[test]
    fn test_pinned_key_mismatch() {
        let mut alice = identity("alice");
        let mut bob = identity("bob");
        let mut impostor = identity("bob");
        bundle::pin(&mut alice, &bundle::generate(&mut bob, 1).unwrap()).unwrap();

        init(&mut alice, &"bob".into()).unwrap();
        let forged = init(&mut impostor, &"alice".into()).unwrap();
        assert!(matches!(
            finalize(&mut alice, &"bob".into(), &forged),
            Err(EngineError::HandshakeMismatch)
        ));
    }
}
