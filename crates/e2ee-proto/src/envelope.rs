//! Envelope construction, canonicalization, and Ed25519 signing/verification
//! (§4.5, §6).

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use e2ee_crypto::{identity, EncryptedPayload, IdentityKeyPair, IdentityPublicKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{ProtoError, Result};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvelopeType {
    Request,
    Offer,
    Accept,
    Result,
    Text,
}

/// A sender or recipient reference: an opaque agent id plus whatever other
/// fields the caller's application layer wants to carry (flattened onto the
/// JSON object at the same level as `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// The plaintext, unsigned envelope (§3 "Envelope (plaintext metadata)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub sender: Participant,
    pub recipient: Participant,
    pub payload: BTreeMap<String, Value>,
}

/// `<base36 ms>-<8 char url-safe-base64 random>`, per §4.5/§6.
fn generate_message_id(now_ms: i64) -> String {
    let millis = to_base36(now_ms.max(0) as u64);
    let mut suffix_bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut suffix_bytes);
    let suffix: String = URL_SAFE_NO_PAD.encode(suffix_bytes).chars().take(8).collect();
    format!("{millis}-{suffix}")
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ASCII")
}

impl Envelope {
    pub fn build(
        sender: Participant,
        recipient: Participant,
        kind: EnvelopeType,
        payload: BTreeMap<String, Value>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: generate_message_id(now_ms),
            kind,
            sender,
            recipient,
            payload,
        }
    }

    /// Lexicographically-sorted-key, null-omitting JSON bytes — the
    /// representation signed and verified.
    ///
    /// `serde_json::to_vec(self)` is NOT enough on its own: a derived
    /// `Serialize` impl writes struct fields straight to the output in
    /// declaration order, never passing through a map at all, so `id`,
    /// `type`, `sender`, `recipient`, `payload` would stay in that order
    /// rather than sorted. Routing through `serde_json::to_value` first
    /// forces every struct and map in the tree into a `serde_json::Map` —
    /// which, without the `preserve_order` feature, is `BTreeMap`-backed —
    /// so the final `to_vec` walks already-sorted keys at every level. Same
    /// trick as building a canonical payload via `json!({...})` instead of
    /// serializing a struct directly.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Fold an `EncryptedPayload` into the envelope payload map shape defined by
/// §6: `encrypted`, `ciphertext`, `nonce`, `sequence`, `timestamp`.
pub fn encrypted_payload_to_map(payload: &EncryptedPayload) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert("encrypted".to_string(), Value::Bool(true));
    map.insert("ciphertext".to_string(), Value::Bytes(payload.ciphertext.clone()));
    map.insert("nonce".to_string(), Value::Bytes(payload.nonce.to_vec()));
    map.insert("sequence".to_string(), Value::Number(payload.sequence as f64));
    map.insert("timestamp".to_string(), Value::Number(payload.timestamp as f64));
    map
}

/// Inverse of `encrypted_payload_to_map`, used by a consumer after
/// verification and before decryption.
pub fn map_to_encrypted_payload(map: &BTreeMap<String, Value>) -> Result<EncryptedPayload> {
    let ciphertext = match map.get("ciphertext") {
        Some(Value::Bytes(b)) => b.clone(),
        _ => return Err(ProtoError::MalformedEnvelope("payload.ciphertext missing or not bytes".into())),
    };
    let nonce_bytes = match map.get("nonce") {
        Some(Value::Bytes(b)) => b.clone(),
        _ => return Err(ProtoError::MalformedEnvelope("payload.nonce missing or not bytes".into())),
    };
    let nonce: [u8; 24] = nonce_bytes
        .try_into()
        .map_err(|_| ProtoError::MalformedEnvelope("payload.nonce must be 24 bytes".into()))?;
    let sequence = match map.get("sequence") {
        Some(Value::Number(n)) => *n as u32,
        _ => return Err(ProtoError::MalformedEnvelope("payload.sequence missing or not a number".into())),
    };
    let timestamp = match map.get("timestamp") {
        Some(Value::Number(n)) => *n as i64,
        _ => return Err(ProtoError::MalformedEnvelope("payload.timestamp missing or not a number".into())),
    };
    Ok(EncryptedPayload {
        ciphertext,
        nonce,
        sequence,
        timestamp,
    })
}

/// An envelope plus a detached Ed25519 signature over its canonical bytes
/// and the sender's verify key, for verifier convenience (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub envelope: Envelope,
    #[serde(with = "sig_codec")]
    pub signature: [u8; 64],
    #[serde(rename = "senderKey", with = "key_codec")]
    pub sender_key: IdentityPublicKey,
}

mod sig_codec {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        URL_SAFE_NO_PAD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must decode to 64 bytes"))
    }
}

mod key_codec {
    use e2ee_crypto::IdentityPublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &IdentityPublicKey, s: S) -> Result<S::Ok, S::Error> {
        key.to_b64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<IdentityPublicKey, D::Error> {
        let encoded = String::deserialize(d)?;
        IdentityPublicKey::from_b64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Sign an envelope's canonical bytes with the sender's identity key.
pub fn sign(envelope: Envelope, signing_identity: &IdentityKeyPair) -> Result<SignedEnvelope> {
    let canonical = envelope.canonical_bytes()?;
    let signature = signing_identity.sign(&canonical);
    Ok(SignedEnvelope {
        envelope,
        signature,
        sender_key: signing_identity.public(),
    })
}

/// Verify a signed envelope. Checks the signature over the canonical bytes
/// first, then that `sender.id` actually resolves (as a DID) to the attached
/// `sender_key` — a forged envelope correctly signed by the wrong key is
/// still rejected (`IdentityMismatch`), not just a tampered one
/// (`BadSignature`).
pub fn verify(signed: &SignedEnvelope) -> Result<()> {
    let canonical = signed.envelope.canonical_bytes()?;
    IdentityKeyPair::verify(&signed.sender_key, &canonical, &signed.signature)
        .map_err(|_| ProtoError::BadSignature)?;

    let resolved = identity::resolve_did(&signed.envelope.sender.id)?;
    if resolved != signed.sender_key {
        return Err(ProtoError::IdentityMismatch);
    }
    Ok(())
}
