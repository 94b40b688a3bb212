//! End-to-end seed scenarios from §8: roundtrip, wrong recipient, replay,
//! and tampered envelope.

use std::collections::BTreeMap;

use e2ee_crypto::{identity, IdentityKeyPair, SessionManager, SessionManagerConfig};
use e2ee_proto::{encrypted_payload_to_map, map_to_encrypted_payload, sign, verify, Envelope, EnvelopeType, Participant, ProtoError};

/// Scenario 1: roundtrip. A encrypts "hello" to B; envelope is signed,
/// transmitted as bytes, parsed, verified, and decrypted at B.
#[test]
fn scenario_1_roundtrip_through_signed_envelope() {
    let alice_identity = std::sync::Arc::new(IdentityKeyPair::generate().unwrap());
    let bob_identity = std::sync::Arc::new(IdentityKeyPair::generate().unwrap());

    let alice = SessionManager::from_identity(std::sync::Arc::clone(&alice_identity), SessionManagerConfig::default());
    let bob = SessionManager::from_identity(std::sync::Arc::clone(&bob_identity), SessionManagerConfig::default());

    let alice_session = alice.establish_session(&bob.local_did()).unwrap();
    let bob_session = bob.establish_session(&alice.local_did()).unwrap();
    assert_eq!(alice_session, bob_session);

    let encrypted = alice.encrypt(&alice_session, b"hello").unwrap();

    let sender = Participant::new(alice.local_did());
    let recipient = Participant::new(bob.local_did());
    let envelope = Envelope::build(sender, recipient, EnvelopeType::Text, encrypted_payload_to_map(&encrypted), 1_700_000_000_000);
    let signed = sign(envelope, &alice_identity).unwrap();

    // Simulate wire transport.
    let wire_bytes = serde_json::to_vec(&signed).unwrap();
    let received: e2ee_proto::SignedEnvelope = serde_json::from_slice(&wire_bytes).unwrap();

    verify(&received).unwrap();
    let payload = map_to_encrypted_payload(&received.envelope.payload).unwrap();
    let plaintext = bob.decrypt(&bob_session, &payload).unwrap();

    assert_eq!(plaintext, b"hello");
    assert_eq!(payload.sequence, 1);

    alice.stop();
    bob.stop();
}

/// Scenario 2: wrong recipient. A encrypts to B; a third party C attempts to
/// decrypt using its own session with A. Expected: `AuthenticationFailure`.
#[test]
fn scenario_2_wrong_recipient_fails_authentication() {
    let alice = SessionManager::new(SessionManagerConfig::default()).unwrap();
    let bob = SessionManager::new(SessionManagerConfig::default()).unwrap();
    let eve = SessionManager::new(SessionManagerConfig::default()).unwrap();

    let alice_session = alice.establish_session(&bob.local_did()).unwrap();
    let eve_session = eve.establish_session(&alice.local_did()).unwrap();

    let payload = alice.encrypt(&alice_session, b"hello").unwrap();
    let err = eve.decrypt(&eve_session, &payload).unwrap_err();
    assert!(matches!(err, e2ee_crypto::E2eeError::AuthenticationFailure));

    alice.stop();
    bob.stop();
    eve.stop();
}

/// Scenario 3: replay. A sends m1 (seq=1), m2 (seq=2). An adversary
/// re-delivers m1. Expected: the first two decrypts succeed; the replay
/// fails with `ReplayDetected`.
#[test]
fn scenario_3_replay_is_rejected() {
    let alice = SessionManager::new(SessionManagerConfig::default()).unwrap();
    let bob = SessionManager::new(SessionManagerConfig::default()).unwrap();

    let alice_session = alice.establish_session(&bob.local_did()).unwrap();
    let bob_session = bob.establish_session(&alice.local_did()).unwrap();

    let m1 = alice.encrypt(&alice_session, b"m1").unwrap();
    let m2 = alice.encrypt(&alice_session, b"m2").unwrap();

    bob.decrypt(&bob_session, &m1).unwrap();
    bob.decrypt(&bob_session, &m2).unwrap();

    let err = bob.decrypt(&bob_session, &m1).unwrap_err();
    assert!(matches!(err, e2ee_crypto::E2eeError::ReplayDetected { .. }));

    alice.stop();
    bob.stop();
}

/// Scenario 6: tampered envelope. Flipping one bit in the signed envelope's
/// ciphertext must fail verification (`BadSignature`); decryption must never
/// be attempted on an unverified envelope.
#[test]
fn scenario_6_tampered_envelope_fails_verification() {
    let alice_identity = std::sync::Arc::new(IdentityKeyPair::generate().unwrap());
    let bob_identity = std::sync::Arc::new(IdentityKeyPair::generate().unwrap());
    let alice = SessionManager::from_identity(std::sync::Arc::clone(&alice_identity), SessionManagerConfig::default());
    let bob = SessionManager::from_identity(std::sync::Arc::clone(&bob_identity), SessionManagerConfig::default());

    let alice_session = alice.establish_session(&bob.local_did()).unwrap();
    let encrypted = alice.encrypt(&alice_session, b"hello").unwrap();

    let sender = Participant::new(alice.local_did());
    let recipient = Participant::new(bob.local_did());
    let envelope = Envelope::build(sender, recipient, EnvelopeType::Text, encrypted_payload_to_map(&encrypted), 1_700_000_000_000);
    let mut signed = sign(envelope, &alice_identity).unwrap();

    if let Some(e2ee_proto::Value::Bytes(bytes)) = signed.envelope.payload.get_mut("ciphertext") {
        bytes[0] ^= 0x01;
    } else {
        panic!("ciphertext not present as bytes");
    }

    let err = verify(&signed).unwrap_err();
    assert!(matches!(err, ProtoError::BadSignature));

    alice.stop();
    bob.stop();
}

#[test]
fn participant_extra_fields_survive_canonicalization() {
    let mut sender = Participant::new("did:key:zTest");
    sender.extra.insert("displayName".to_string(), e2ee_proto::Value::from("Alice"));
    let recipient = Participant::new("did:key:zOther");
    let envelope = Envelope::build(sender, recipient, EnvelopeType::Text, BTreeMap::new(), 1_700_000_000_000);
    let bytes = envelope.canonical_bytes().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("displayName"));
}
