//! Core types used throughout CosmicCipher

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Caller-supplied user identifier, unique within one engine
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserHandle(String);

impl UserHandle {
    /// Create from string
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get as bytes, for key-schedule labels
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for UserHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for UserHandle {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for UserHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handshake progress of one (local, peer) session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeState {
    /// No handshake attempt recorded
    #[default]
    None,
    /// Local init sent, waiting for the peer's packet
    Initiated,
    /// Session keys derived
    Established,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandshakeState::None => "none",
            HandshakeState::Initiated => "initiated",
            HandshakeState::Established => "established",
        };
        f.write_str(s)
    }
}

/// Side of the handshake a party plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Lower-sorting side; sends with the initiator-to-responder key
    Initiator,
    /// Higher-sorting side
    Responder,
}

/// Public summary of an identity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityInfo {
    /// Handle
    pub handle: UserHandle,
    /// Ed25519 verifying key (hex)
    pub signing_key: String,
    /// X25519 static public key (hex)
    pub agreement_key: String,
    /// Identity fingerprint (hex)
    pub fingerprint: String,
    /// Creation time (milliseconds since Unix epoch)
    pub created_at: i64,
    /// Sessions in any state
    pub sessions: usize,
    /// Sessions with derived keys
    pub established_sessions: usize,
    /// Own prekeys handed out in bundles
    pub reserved_prekeys: usize,
    /// Own prekeys already used by a completed handshake
    pub consumed_prekeys: usize,
    /// Peers whose bundles are pinned
    pub pinned_bundles: usize,
}

/// Fingerprints of a session's traffic keys
///
/// Two sides of one session see each other's values swapped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyFingerprints {
    /// Fingerprint of the send key (hex)
    pub send: String,
    /// Fingerprint of the receive key (hex)
    pub receive: String,
}

/// Current time in milliseconds since Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_handle_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(UserHandle::from("alice"), 1);
        assert_eq!(map.get("alice"), Some(&1));
        assert_eq!(map.get("bob"), None);
    }

    #[test]
    fn test_handle_ordering() {
        assert!(UserHandle::from("alice") < UserHandle::from("bob"));
        assert_eq!(UserHandle::new("x").to_string(), "x");
    }

    #[test]
    fn test_default_state() {
        assert_eq!(HandshakeState::default(), HandshakeState::None);
        assert_eq!(HandshakeState::Established.to_string(), "established");
    }
}
