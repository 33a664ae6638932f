//! Prekey bundles ("instances")
//!
//! A bundle publishes a batch of fresh X25519 prekeys next to the owner's
//! static key, signed with the owner's Ed25519 key. The owner keeps every
//! prekey secret as a [`ReservedPrekey`] with an explicit consumed flag; a
//! peer that imports the bundle pins the owner's keys and the unused prekeys
//! so its next handshake can fold one of them into the key schedule without
//! the owner being online.

use cosmiccipher_crypto::kdf::domain;
use cosmiccipher_crypto::keys::{random_bytes, verify_signature, AgreementKeyPair, PublicKeyBytes};
use cosmiccipher_crypto::{CryptoError, SUITE_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::MAX_PREKEYS_PER_BUNDLE;
use crate::error::{EngineError, Result};
use crate::identity::Identity;
use crate::types::{now_millis, UserHandle};
use crate::wire::{self, PayloadKind};

/// Bundle identifier length
pub const BUNDLE_ID_SIZE: usize = 16;

/// Reference to one prekey of one bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PrekeyRef {
    #[serde(with = "hex::serde")]
    pub(crate) bundle_id: [u8; BUNDLE_ID_SIZE],
    pub(crate) prekey_id: u32,
}

/// Prekey secret held by the bundle owner
pub(crate) struct ReservedPrekey {
    pub(crate) bundle_id: [u8; BUNDLE_ID_SIZE],
    pub(crate) prekey_id: u32,
    pub(crate) key: AgreementKeyPair,
    /// Set once a completed handshake used this prekey; never cleared
    pub(crate) consumed: bool,
    pub(crate) created_at: i64,
}

impl ReservedPrekey {
    fn matches(&self, reference: &PrekeyRef) -> bool {
        self.bundle_id == reference.bundle_id && self.prekey_id == reference.prekey_id
    }
}

/// Prekey public half as pinned by an importer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PinnedPrekey {
    pub(crate) prekey_id: u32,
    pub(crate) public: PublicKeyBytes,
    /// Already referenced by one of our handshake packets
    pub(crate) used: bool,
}

/// Peer key material learned from an imported bundle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PinnedBundle {
    #[serde(with = "hex::serde")]
    pub(crate) bundle_id: [u8; BUNDLE_ID_SIZE],
    pub(crate) signing_key: PublicKeyBytes,
    pub(crate) static_key: PublicKeyBytes,
    pub(crate) prekeys: Vec<PinnedPrekey>,
    pub(crate) imported_at: i64,
}

impl PinnedBundle {
    /// First prekey not yet referenced by a handshake
    pub(crate) fn next_unused(&self) -> Option<(PrekeyRef, PublicKeyBytes)> {
        self.prekeys.iter().find(|p| !p.used).map(|p| {
            (
                PrekeyRef {
                    bundle_id: self.bundle_id,
                    prekey_id: p.prekey_id,
                },
                p.public,
            )
        })
    }

    pub(crate) fn mark_used(&mut self, prekey_id: u32) {
        if let Some(prekey) = self.prekeys.iter_mut().find(|p| p.prekey_id == prekey_id) {
            prekey.used = true;
        }
    }

    /// Prekeys still available for handshakes
    pub(crate) fn remaining(&self) -> usize {
        self.prekeys.iter().filter(|p| !p.used).count()
    }
}

/// Signed bundle contents
#[derive(Serialize, Deserialize)]
struct BundleContents {
    suite: u8,
    owner: UserHandle,
    #[serde(with = "hex::serde")]
    bundle_id: [u8; BUNDLE_ID_SIZE],
    signing_key: PublicKeyBytes,
    static_key: PublicKeyBytes,
    prekeys: Vec<(u32, PublicKeyBytes)>,
    created_at: i64,
}

#[derive(Serialize, Deserialize)]
struct SignedBundle {
    contents: BundleContents,
    signature: Vec<u8>,
}

fn signed_message(contents: &BundleContents) -> std::result::Result<Vec<u8>, bincode::Error> {
    let mut message = Vec::new();
    message.extend_from_slice(domain::BUNDLE_SIGNATURE);
    message.extend_from_slice(&PayloadKind::Bundle.header());
    message.extend_from_slice(&wire::to_canonical(contents)?);
    Ok(message)
}

/// Generate a bundle of `count` fresh prekeys and reserve their secrets
pub(crate) fn generate(identity: &mut Identity, count: usize) -> Result<Vec<u8>> {
    let bundle_id = random_bytes::<BUNDLE_ID_SIZE>()?;
    let created_at = now_millis();

    let mut reserved = Vec::with_capacity(count);
    for offset in 0..count as u32 {
        reserved.push(ReservedPrekey {
            bundle_id,
            prekey_id: identity.next_prekey_id.wrapping_add(offset),
            key: AgreementKeyPair::generate()?,
            consumed: false,
            created_at,
        });
    }

    let contents = BundleContents {
        suite: SUITE_ID,
        owner: identity.handle().clone(),
        bundle_id,
        signing_key: identity.signing_public(),
        static_key: identity.agreement_public(),
        prekeys: reserved
            .iter()
            .map(|p| (p.prekey_id, p.key.public_key()))
            .collect(),
        created_at,
    };
    let message = signed_message(&contents).map_err(CryptoError::from)?;
    let signature = identity.signing().sign(&message).to_vec();
    let bytes = wire::encode(PayloadKind::Bundle, &SignedBundle { contents, signature })
        .map_err(CryptoError::from)?;

    identity.next_prekey_id = identity.next_prekey_id.wrapping_add(count as u32);
    identity.prekeys.extend(reserved);

    info!(
        "Generated bundle {} with {} prekeys for {}",
        hex::encode(&bundle_id[..4]),
        count,
        identity.handle()
    );
    Ok(bytes)
}

/// Verify a peer's bundle and pin its key material
///
/// Returns the bundle owner. Any rejection is [`EngineError::InvalidBundle`]
/// and leaves the identity untouched.
pub(crate) fn pin(identity: &mut Identity, bytes: &[u8]) -> Result<UserHandle> {
    let bundle: SignedBundle =
        wire::decode(PayloadKind::Bundle, bytes).map_err(|_| EngineError::InvalidBundle)?;
    let contents = bundle.contents;

    if contents.suite != SUITE_ID {
        return Err(EngineError::InvalidBundle);
    }
    let message = signed_message(&contents).map_err(|_| EngineError::InvalidBundle)?;
    verify_signature(&contents.signing_key, &message, &bundle.signature)
        .map_err(|_| EngineError::InvalidBundle)?;

    // Our own bundle, under our handle or our key
    if contents.owner == *identity.handle() || contents.signing_key == identity.signing_public() {
        return Err(EngineError::InvalidBundle);
    }
    if contents.prekeys.is_empty() || contents.prekeys.len() > MAX_PREKEYS_PER_BUNDLE {
        return Err(EngineError::InvalidBundle);
    }
    let mut ids = HashSet::with_capacity(contents.prekeys.len());
    if !contents.prekeys.iter().all(|(id, _)| ids.insert(*id)) {
        return Err(EngineError::InvalidBundle);
    }

    let previous = identity.pinned.get(&contents.owner);
    if let Some(previous) = previous {
        if previous.signing_key != contents.signing_key
            || previous.static_key != contents.static_key
        {
            warn!("Pinned keys for {} changed", contents.owner);
        }
    }
    // Re-importing the same bundle must not hand out prekeys a second time
    let already_used: HashSet<u32> = previous
        .filter(|p| p.bundle_id == contents.bundle_id)
        .map(|p| p.prekeys.iter().filter(|k| k.used).map(|k| k.prekey_id).collect())
        .unwrap_or_default();

    let pinned = PinnedBundle {
        bundle_id: contents.bundle_id,
        signing_key: contents.signing_key,
        static_key: contents.static_key,
        prekeys: contents
            .prekeys
            .iter()
            .map(|(prekey_id, public)| PinnedPrekey {
                prekey_id: *prekey_id,
                public: *public,
                used: already_used.contains(prekey_id),
            })
            .collect(),
        imported_at: now_millis(),
    };
    debug!(
        "{} pinned bundle of {} ({} prekeys available)",
        identity.handle(),
        contents.owner,
        pinned.remaining()
    );

    let owner = contents.owner;
    identity.pinned.insert(owner.clone(), pinned);
    Ok(owner)
}

/// Find an own, unconsumed prekey referenced by a peer packet
pub(crate) fn find_unconsumed<'a>(
    identity: &'a Identity,
    reference: &PrekeyRef,
) -> Option<&'a ReservedPrekey> {
    identity
        .prekeys
        .iter()
        .find(|p| p.matches(reference) && !p.consumed)
}

/// Mark an own prekey consumed
pub(crate) fn consume(identity: &mut Identity, reference: &PrekeyRef) {
    if let Some(prekey) = identity.prekeys.iter_mut().find(|p| p.matches(reference)) {
        prekey.consumed = true;
        info!(
            "{} consumed prekey {} of bundle {}",
            identity.handle,
            reference.prekey_id,
            hex::encode(&reference.bundle_id[..4])
        );
    }
}
