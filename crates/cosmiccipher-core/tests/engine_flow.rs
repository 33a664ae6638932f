//! End-to-end tests for the CosmicCipher engine
//!
//! These drive the public `Engine` surface the way a transport or the demo
//! harness does: payloads leave one identity as opaque bytes and enter another.

use cosmiccipher_core::wire::{self, from_base64, to_base64};
use cosmiccipher_core::{
    Engine, EngineConfig, EngineError, HandshakeState, SessionKeyFingerprints, UserHandle,
};
use std::sync::Arc;
use proptest::prelude::*;

fn engine() -> Engine {
    Engine::new(EngineConfig::insecure_fast()).unwrap()
}

fn engine_with_users(handles: &[&str]) -> Engine {
    let engine = engine();
    for handle in handles {
        engine.new_user(handle).unwrap();
    }
    engine
}

/// Both sides init, then both finalize
fn handshake(engine: &Engine, a: &str, b: &str) {
    let packet_a = engine.init_dh_kex(a, b).unwrap();
    let packet_b = engine.init_dh_kex(b, a).unwrap();
    engine.finalize_dh_kex(a, b, &packet_b).unwrap();
    engine.finalize_dh_kex(b, a, &packet_a).unwrap();
}

fn fingerprints(engine: &Engine, local: &str, peer: &str) -> SessionKeyFingerprints {
    engine.session_key_fingerprints(local, peer).unwrap()
}

/// Send counter of a ciphertext: after the envelope header and the 16-byte
/// session id, little-endian
fn counter_of(ciphertext: &[u8]) -> u64 {
    let start = wire::HEADER_SIZE + 16;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&ciphertext[start..start + 8]);
    u64::from_le_bytes(bytes)
}

#[test_log::test]
fn test_new_user_twice_fails() {
    let engine = engine_with_users(&["bob"]);
    let before = engine.identity_info("bob").unwrap();

    assert!(matches!(engine.new_user("bob"), Err(EngineError::AlreadyExists(_))));
    assert_eq!(engine.identity_info("bob").unwrap(), before);
}

#[test_log::test]
fn test_harness_sequence() {
    let engine = engine_with_users(&["bob"]);

    let blob = engine.export_user("bob", "test").unwrap();
    engine.delete_user("bob").unwrap();
    engine.import_user("bob", "test", &blob).unwrap();
    engine.new_user("alice").unwrap();

    let instance = engine.generate_instance("bob").unwrap();
    engine.import_instance("alice", &instance).unwrap();

    let alice_packet = engine.init_dh_kex("alice", "bob").unwrap();
    let bob_packet = engine.init_dh_kex("bob", "alice").unwrap();
    engine.finalize_dh_kex("alice", "bob", &bob_packet).unwrap();
    engine.finalize_dh_kex("bob", "alice", &alice_packet).unwrap();

    let ciphertext = engine.encrypt("bob", "alice", b"Hello Alice!").unwrap();
    let plaintext = engine.decrypt("alice", "bob", &ciphertext).unwrap();
    assert_eq!(plaintext, b"Hello Alice!");

    // Alice's packet used one of Bob's published prekeys
    assert_eq!(engine.identity_info("bob").unwrap().consumed_prekeys, 1);
}

#[test_log::test]
fn test_export_import_round_trip() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");
    let _ = engine.encrypt("alice", "bob", b"advance the counter").unwrap();

    let blob = engine.export_user("alice", "correct horse").unwrap();

    let other = engine_with_users(&["bob-elsewhere"]);
    other.import_user("alice2", "correct horse", &blob).unwrap();

    let original = engine.identity_info("alice").unwrap();
    let restored = other.identity_info("alice2").unwrap();
    assert_eq!(restored.signing_key, original.signing_key);
    assert_eq!(restored.agreement_key, original.agreement_key);
    assert_eq!(restored.fingerprint, original.fingerprint);
    assert_eq!(restored.sessions, original.sessions);
    assert_eq!(
        fingerprints(&other, "alice2", "bob"),
        fingerprints(&engine, "alice", "bob")
    );

    // The restored copy keeps talking on the same session
    let ciphertext = other.encrypt("alice2", "bob", b"from the copy").unwrap();
    assert_eq!(engine.decrypt("bob", "alice", &ciphertext).unwrap(), b"from the copy");
}

#[test_log::test]
fn test_import_wrong_password_leaves_store() {
    let engine = engine_with_users(&["bob"]);
    let blob = engine.export_user("bob", "test").unwrap();
    let before = engine.list_users();

    assert!(matches!(
        engine.import_user("carol", "Test", &blob),
        Err(EngineError::ImportFailed)
    ));
    assert_eq!(engine.list_users(), before);
}

#[test_log::test]
fn test_import_existing_handle() {
    let engine = engine_with_users(&["bob"]);
    let blob = engine.export_user("bob", "test").unwrap();
    let before = engine.identity_info("bob").unwrap();

    assert!(matches!(
        engine.import_user("bob", "test", &blob),
        Err(EngineError::AlreadyExists(_))
    ));
    assert_eq!(engine.identity_info("bob").unwrap(), before);
}

#[test_log::test]
fn test_import_garbage() {
    let engine = engine();
    for blob in [&b""[..], &b"CC"[..], &b"CC\x01\x01"[..], &b"CC\x01\x02\x00\x00"[..]] {
        assert!(matches!(
            engine.import_user("bob", "test", blob),
            Err(EngineError::ImportFailed)
        ));
    }
    assert!(engine.list_users().is_empty());
}

#[test_log::test]
fn test_handshake_symmetry() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    let alice = fingerprints(&engine, "alice", "bob");
    let bob = fingerprints(&engine, "bob", "alice");
    assert_eq!(alice.send, bob.receive);
    assert_eq!(alice.receive, bob.send);
    assert_ne!(alice.send, alice.receive);

    assert_eq!(engine.session_state("alice", "bob").unwrap(), HandshakeState::Established);
    assert_eq!(engine.session_state("bob", "alice").unwrap(), HandshakeState::Established);
}

#[test_log::test]
fn test_both_directions_many_messages() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    for i in 0..20u32 {
        let message = format!("message {}", i);
        let (from, to) = if i % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
        let ciphertext = engine.encrypt(from, to, message.as_bytes()).unwrap();
        assert_eq!(engine.decrypt(to, from, &ciphertext).unwrap(), message.as_bytes());
    }
}

#[test_log::test]
fn test_repeated_queries_are_stable() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    let first = engine.lookup("alice").unwrap();
    let second = engine.lookup("alice").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    drop((first, second));

    let alice_info = engine.identity_info("alice").unwrap();
    let bob_info = engine.identity_info("bob").unwrap();
    let users = engine.list_users();
    for _ in 0..3 {
        assert_eq!(engine.identity_info("alice").unwrap(), alice_info);
        assert_eq!(engine.session_state("alice", "bob").unwrap(), HandshakeState::Established);
        assert_eq!(engine.list_users(), users);
    }

    // Encrypting moves only the sender's counter
    let bob_keys = fingerprints(&engine, "bob", "alice");
    let one = engine.encrypt("alice", "bob", b"same").unwrap();
    let two = engine.encrypt("alice", "bob", b"same").unwrap();
    assert_ne!(one, two);
    assert_eq!(counter_of(&two), counter_of(&one) + 1);

    assert_eq!(engine.identity_info("alice").unwrap(), alice_info);
    assert_eq!(engine.identity_info("bob").unwrap(), bob_info);
    assert_eq!(fingerprints(&engine, "bob", "alice"), bob_keys);
    assert_eq!(engine.session_state("bob", "alice").unwrap(), HandshakeState::Established);

    assert_eq!(engine.decrypt("bob", "alice", &two).unwrap(), b"same");
    assert_eq!(engine.decrypt("bob", "alice", &one).unwrap(), b"same");
}

#[test_log::test]
fn test_reinit_with_packet_in_flight() {
    let engine = engine_with_users(&["alice", "bob"]);
    let alice_packet = engine.init_dh_kex("alice", "bob").unwrap();
    let bob_packet = engine.init_dh_kex("bob", "alice").unwrap();

    assert!(matches!(
        engine.init_dh_kex("alice", "bob"),
        Err(EngineError::HandshakeMismatch)
    ));

    engine.finalize_dh_kex("alice", "bob", &bob_packet).unwrap();
    engine.finalize_dh_kex("bob", "alice", &alice_packet).unwrap();
    let alice_keys = fingerprints(&engine, "alice", "bob");
    let bob_keys = fingerprints(&engine, "bob", "alice");
    assert_eq!(alice_keys.send, bob_keys.receive);
    assert_eq!(alice_keys.receive, bob_keys.send);

    let ciphertext = engine.encrypt("alice", "bob", b"still paired").unwrap();
    assert_eq!(engine.decrypt("bob", "alice", &ciphertext).unwrap(), b"still paired");
}

#[test_log::test]
fn test_reset_allows_new_attempt() {
    let engine = engine_with_users(&["alice", "bob"]);
    engine.init_dh_kex("alice", "bob").unwrap();
    engine.reset_session("alice", "bob").unwrap();

    let alice_packet = engine.init_dh_kex("alice", "bob").unwrap();
    let bob_packet = engine.init_dh_kex("bob", "alice").unwrap();
    engine.finalize_dh_kex("alice", "bob", &bob_packet).unwrap();
    engine.finalize_dh_kex("bob", "alice", &alice_packet).unwrap();

    let ciphertext = engine.encrypt("bob", "alice", b"fresh").unwrap();
    assert_eq!(engine.decrypt("alice", "bob", &ciphertext).unwrap(), b"fresh");
}

#[test_log::test]
fn test_replay_rejected() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    let ciphertext = engine.encrypt("bob", "alice", b"Hello Alice!").unwrap();
    engine.decrypt("alice", "bob", &ciphertext).unwrap();
    assert!(matches!(
        engine.decrypt("alice", "bob", &ciphertext),
        Err(EngineError::AuthenticationFailed)
    ));

    // Later messages still go through
    let next = engine.encrypt("bob", "alice", b"again").unwrap();
    assert_eq!(engine.decrypt("alice", "bob", &next).unwrap(), b"again");
}

#[test_log::test]
fn test_ciphertext_bound_to_pair() {
    let engine = engine_with_users(&["alice", "bob", "carol"]);
    handshake(&engine, "alice", "bob");
    handshake(&engine, "alice", "carol");

    let to_bob = engine.encrypt("alice", "bob", b"for bob only").unwrap();
    assert!(matches!(
        engine.decrypt("carol", "alice", &to_bob),
        Err(EngineError::AuthenticationFailed)
    ));
    // Reflected back at the sender
    assert!(matches!(
        engine.decrypt("alice", "bob", &to_bob),
        Err(EngineError::AuthenticationFailed)
    ));
}

#[test_log::test]
fn test_no_session() {
    let engine = engine_with_users(&["alice", "bob"]);
    assert!(matches!(
        engine.encrypt("alice", "bob", b"hi"),
        Err(EngineError::NoSession { .. })
    ));

    engine.init_dh_kex("alice", "bob").unwrap();
    assert_eq!(engine.session_state("alice", "bob").unwrap(), HandshakeState::Initiated);
    assert!(matches!(
        engine.encrypt("alice", "bob", b"hi"),
        Err(EngineError::NoSession { .. })
    ));
    assert!(matches!(
        engine.decrypt("alice", "bob", b"anything"),
        Err(EngineError::NoSession { .. })
    ));
    assert!(matches!(
        engine.session_key_fingerprints("alice", "bob"),
        Err(EngineError::NoSession { .. })
    ));
}

#[test_log::test]
fn test_rehandshake_supersedes_keys() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");
    let old = engine.encrypt("alice", "bob", b"old keys").unwrap();
    let first = fingerprints(&engine, "alice", "bob");

    handshake(&engine, "alice", "bob");
    assert_ne!(fingerprints(&engine, "alice", "bob"), first);
    assert!(matches!(
        engine.decrypt("bob", "alice", &old),
        Err(EngineError::AuthenticationFailed)
    ));
}

#[test_log::test]
fn test_single_use_bundle() {
    let engine = Engine::new(EngineConfig {
        prekeys_per_bundle: 1,
        ..EngineConfig::insecure_fast()
    })
    .unwrap();
    for handle in ["alice", "bob", "carol"] {
        engine.new_user(handle).unwrap();
    }

    let instance = engine.generate_instance("bob").unwrap();
    engine.import_instance("alice", &instance).unwrap();
    engine.import_instance("carol", &instance).unwrap();
    handshake(&engine, "alice", "bob");
    assert_eq!(engine.identity_info("bob").unwrap().consumed_prekeys, 1);

    // Carol references the same prekey; Bob refuses to use it twice
    let carol_packet = engine.init_dh_kex("carol", "bob").unwrap();
    engine.init_dh_kex("bob", "carol").unwrap();
    assert!(matches!(
        engine.finalize_dh_kex("bob", "carol", &carol_packet),
        Err(EngineError::HandshakeMismatch)
    ));
    assert_eq!(engine.session_state("bob", "carol").unwrap(), HandshakeState::Initiated);

    // Re-importing the bundle does not hand the prekey out again
    engine.import_instance("alice", &instance).unwrap();
    handshake(&engine, "alice", "bob");
    assert_eq!(engine.identity_info("bob").unwrap().consumed_prekeys, 1);
}

#[test_log::test]
fn test_invalid_bundle() {
    let engine = engine_with_users(&["alice", "bob"]);
    let mut instance = engine.generate_instance("bob").unwrap();
    let last = instance.len() - 1;
    instance[last] ^= 0x01;

    let before = engine.identity_info("alice").unwrap();
    assert!(matches!(
        engine.import_instance("alice", &instance),
        Err(EngineError::InvalidBundle)
    ));
    assert_eq!(engine.identity_info("alice").unwrap(), before);
    assert!(matches!(
        engine.import_instance("nobody", &instance),
        Err(EngineError::NotFound(_))
    ));
}

#[test_log::test]
fn test_payload_kind_and_version_checked() {
    let engine = engine_with_users(&["alice", "bob"]);
    let instance = engine.generate_instance("bob").unwrap();

    // A bundle is not a handshake packet
    engine.init_dh_kex("alice", "bob").unwrap();
    assert!(matches!(
        engine.finalize_dh_kex("alice", "bob", &instance),
        Err(EngineError::HandshakeMismatch)
    ));

    let mut future = instance.clone();
    future[2] = 2;
    assert!(matches!(
        engine.import_instance("alice", &future),
        Err(EngineError::InvalidBundle)
    ));
}

#[test_log::test]
fn test_delete_user() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    engine.delete_user("alice").unwrap();
    assert!(matches!(engine.identity_info("alice"), Err(EngineError::NotFound(_))));
    assert!(matches!(
        engine.encrypt("alice", "bob", b"hi"),
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.list_users(), vec![UserHandle::from("bob")]);
}

#[test_log::test]
fn test_info_reports_json() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    let info = engine.identity_info("alice").unwrap();
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["handle"], "alice");
    assert_eq!(json["established_sessions"], 1);
    assert!(!json.to_string().contains("secret"));

    let keys = serde_json::to_string(&fingerprints(&engine, "alice", "bob")).unwrap();
    let parsed: SessionKeyFingerprints = serde_json::from_str(&keys).unwrap();
    assert_eq!(parsed.receive, fingerprints(&engine, "bob", "alice").send);
}

#[test_log::test]
fn test_base64_transport() {
    let engine = engine_with_users(&["alice", "bob"]);
    handshake(&engine, "alice", "bob");

    let text = to_base64(&engine.encrypt("alice", "bob", b"over text").unwrap());
    let bytes = from_base64(&text).unwrap();
    assert_eq!(engine.decrypt("bob", "alice", &bytes).unwrap(), b"over text");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_bit_flip_fails(message in proptest::collection::vec(any::<u8>(), 0..256),
                               position in any::<prop::sample::Index>(),
                               bit in 0u8..8) {
        let engine = engine_with_users(&["alice", "bob"]);
        handshake(&engine, "alice", "bob");

        let mut ciphertext = engine.encrypt("alice", "bob", &message).unwrap();
        let i = position.index(ciphertext.len());
        ciphertext[i] ^= 1 << bit;

        prop_assert!(matches!(
            engine.decrypt("bob", "alice", &ciphertext),
            Err(EngineError::AuthenticationFailed)
        ));
    }
}
