//! Key Derivation Functions (KDF) for the CosmicCipher protocol
//!
//! HKDF-based key derivation with domain separation so that keys derived for
//! one protocol context can never be reused in another.

use hkdf::Hkdf;
use sha2::Sha512;
use zeroize::Zeroize;

use crate::aead::{AeadKey, KEY_SIZE};
use crate::error::{CryptoError, Result};

/// HKDF using SHA-512 for key derivation
pub type HkdfSha512 = Hkdf<Sha512>;

/// Size of the session identifier derived next to the session keys
pub const SESSION_ID_SIZE: usize = 16;

/// Domain separation strings for different key derivation contexts
pub mod domain {
    /// Salt for the handshake key schedule
    pub const SESSION_KEYS: &[u8] = b"CosmicCipher_v1_SessionKeys";
    /// Initiator-to-responder traffic key
    pub const INITIATOR_TO_RESPONDER: &[u8] = b"CosmicCipher_v1_InitiatorToResponder";
    /// Responder-to-initiator traffic key
    pub const RESPONDER_TO_INITIATOR: &[u8] = b"CosmicCipher_v1_ResponderToInitiator";
    /// Session identifier
    pub const SESSION_ID: &[u8] = b"CosmicCipher_v1_SessionId";
    /// Signature context for prekey bundles
    pub const BUNDLE_SIGNATURE: &[u8] = b"CosmicCipher_v1_BundleSignature";
    /// Signature context for handshake packets
    pub const PACKET_SIGNATURE: &[u8] = b"CosmicCipher_v1_PacketSignature";
    /// Identity fingerprint
    pub const FINGERPRINT: &[u8] = b"CosmicCipher_v1_Fingerprint";
    /// Session key fingerprint
    pub const KEY_FINGERPRINT: &[u8] = b"CosmicCipher_v1_KeyFingerprint";
}

/// Key derivation context for HKDF operations
pub struct KeyDerivationContext {
    /// The PRK (Pseudo-Random Key) from HKDF-Extract
    hkdf: HkdfSha512,
}

impl KeyDerivationContext {
    /// Create a new KDF context from input key material
    ///
    /// # Arguments
    /// * `salt` - Optional salt (if None, uses zero-filled salt)
    /// * `ikm` - Input Key Material (e.g., concatenated DH outputs)
    pub fn new(salt: Option<&[u8]>, ikm: &[u8]) -> Self {
        let hkdf = HkdfSha512::new(salt, ikm);
        Self { hkdf }
    }

    /// Derive `N` bytes with the given info string
    pub fn derive<const N: usize>(&self, info: &[u8]) -> Result<[u8; N]> {
        let mut output = [0u8; N];
        self.hkdf
            .expand(info, &mut output)
            .map_err(|_| CryptoError::KeyDerivation("HKDF expansion failed".to_string()))?;
        Ok(output)
    }

    /// Derive an AEAD key with the info string `context || label`
    pub fn derive_key(&self, context: &[u8], label: &[u8]) -> Result<AeadKey> {
        let mut info = Vec::with_capacity(context.len() + label.len());
        info.extend_from_slice(context);
        info.extend_from_slice(label);
        let mut bytes = self.derive::<KEY_SIZE>(&info)?;
        let key = AeadKey::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }
}

/// Keys produced by one handshake
///
/// The two traffic keys come from separate HKDF expansions with distinct
/// labels, so neither can be computed from the other.
pub struct DirectionalKeys {
    /// Key for traffic sent by the initiator
    pub initiator_to_responder: AeadKey,
    /// Key for traffic sent by the responder
    pub responder_to_initiator: AeadKey,
    /// Public identifier of the session, bound into every ciphertext
    pub session_id: [u8; SESSION_ID_SIZE],
}

/// Run the session key schedule
///
/// `ikm` is the concatenated DH material, `context` the length-prefixed
/// transcript label (ordered handles and handshake tokens).
pub fn derive_directional_keys(ikm: &[u8], context: &[u8]) -> Result<DirectionalKeys> {
    let kdf = KeyDerivationContext::new(Some(domain::SESSION_KEYS), ikm);

    let initiator_to_responder = kdf.derive_key(context, domain::INITIATOR_TO_RESPONDER)?;
    let responder_to_initiator = kdf.derive_key(context, domain::RESPONDER_TO_INITIATOR)?;

    let mut info = context.to_vec();
    info.extend_from_slice(domain::SESSION_ID);
    let session_id = kdf.derive::<SESSION_ID_SIZE>(&info)?;

    Ok(DirectionalKeys {
        initiator_to_responder,
        responder_to_initiator,
        session_id,
    })
}

/// Build an unambiguous label from parts, each prefixed with its u32 length
pub fn context_label(parts: &[&[u8]]) -> Vec<u8> {
    let mut label = Vec::with_capacity(parts.iter().map(|p| p.len() + 4).sum());
    for part in parts {
        label.extend_from_slice(&(part.len() as u32).to_be_bytes());
        label.extend_from_slice(part);
    }
    label
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// One-way fingerprint of a traffic key, safe to display or compare
pub fn key_fingerprint(key: &AeadKey) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(domain::KEY_FINGERPRINT);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}
