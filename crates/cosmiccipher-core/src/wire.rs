//! Self-describing envelopes for every opaque payload
//!
//! Each payload is `magic ‖ version ‖ kind ‖ bincode(body)`. A payload with the
//! wrong magic, version or kind is rejected before the body is touched, so
//! bytes from an incompatible release are never misinterpreted.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Envelope magic
pub const MAGIC: [u8; 2] = *b"CC";

/// Current payload format version
pub const FORMAT_VERSION: u8 = 1;

/// Envelope header length
pub const HEADER_SIZE: usize = 4;

/// Upper bound on a decoded body, guards allocation from hostile lengths
const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

/// Kind of payload carried by an envelope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    /// Password-protected identity export
    ExportBlob = 1,
    /// Signed prekey bundle
    Bundle = 2,
    /// Handshake packet
    KexPacket = 3,
    /// Session ciphertext
    Ciphertext = 4,
}

impl PayloadKind {
    /// Header for this kind at the current version
    pub const fn header(self) -> [u8; HEADER_SIZE] {
        [MAGIC[0], MAGIC[1], FORMAT_VERSION, self as u8]
    }
}

/// Envelope decoding failure
///
/// Never surfaced to callers directly; each operation maps it onto its own
/// error so malformed input reveals nothing beyond "rejected".
#[derive(Debug, Error)]
pub(crate) enum WireError {
    #[error("payload truncated")]
    Truncated,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("unexpected payload kind {0}")]
    WrongKind(u8),
    #[error("body: {0}")]
    Body(#[from] bincode::Error),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_BODY_SIZE)
        .reject_trailing_bytes()
}

/// Canonical bincode encoding of a body, without envelope
pub(crate) fn to_canonical<T: Serialize>(body: &T) -> Result<Vec<u8>, bincode::Error> {
    options().serialize(body)
}

/// Decode a canonical body that carries no envelope
pub(crate) fn from_canonical<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, bincode::Error> {
    options().deserialize(bytes)
}

/// Wrap a body in an envelope of the given kind
pub(crate) fn encode<T: Serialize>(kind: PayloadKind, body: &T) -> Result<Vec<u8>, bincode::Error> {
    let encoded = options().serialize(body)?;
    let mut out = Vec::with_capacity(HEADER_SIZE + encoded.len());
    out.extend_from_slice(&kind.header());
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// Check the header and decode the body
pub(crate) fn decode<T: DeserializeOwned>(kind: PayloadKind, bytes: &[u8]) -> Result<T, WireError> {
    let body = check_header(kind, bytes)?;
    Ok(options().deserialize(body)?)
}

fn check_header(kind: PayloadKind, bytes: &[u8]) -> Result<&[u8], WireError> {
    if bytes.len() < HEADER_SIZE {
        return Err(WireError::Truncated);
    }
    if bytes[..2] != MAGIC {
        return Err(WireError::BadMagic);
    }
    if bytes[2] != FORMAT_VERSION {
        return Err(WireError::UnsupportedVersion(bytes[2]));
    }
    if bytes[3] != kind as u8 {
        return Err(WireError::WrongKind(bytes[3]));
    }
    Ok(&bytes[HEADER_SIZE..])
}

/// Encode any payload as standard base64, for text transports
pub fn to_base64(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decode a base64 payload
pub fn from_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}
