//! Long-term identity keys and the Ed25519 → X25519 conversions used to turn
//! a signing identity into a key-agreement identity.
//!
//! Each agent has exactly one long-term `IdentityKeyPair` (Ed25519), durable
//! across the process lifetime. Sessions are derived from it; the keypair
//! itself is never serialized or logged (I3).

use std::convert::TryInto;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{E2eeError, Result};

/// 32-byte Ed25519 public (verify) key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityPublicKey(pub [u8; 32]);

impl IdentityPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| E2eeError::InvalidKey("identity public key must be 32 bytes".into()))?;
        // Reject the identity/low-order point up front so callers never
        // carry a key that would later fail X25519 conversion silently.
        VerifyingKey::from_bytes(&arr).map_err(|e| E2eeError::InvalidKey(e.to_string()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(s)?;
        Self::from_bytes(&bytes)
    }

    /// Human-readable fingerprint for out-of-band verification: BLAKE3 of
    /// the public key, truncated to 20 bytes, hex in groups of 4.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = hex::encode(&hash.as_bytes()[..20]);
        hex.chars()
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|c| c.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Constant-time fingerprint comparison for manual key verification.
    pub fn fingerprints_match(&self, other: &IdentityPublicKey) -> bool {
        let h1 = blake3::hash(&self.0);
        let h2 = blake3::hash(&other.0);
        let mut diff = 0u8;
        for (a, b) in h1.as_bytes().iter().zip(h2.as_bytes().iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| E2eeError::InvalidKey(e.to_string()))
    }
}

/// Long-term Ed25519 identity keypair. Zeroized on drop; never serialized.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: IdentityPublicKey,
    secret_seed: [u8; 32],
}

impl IdentityKeyPair {
    /// Draw 32 bytes of cryptographically secure randomness and derive the
    /// Ed25519 keypair from it.
    pub fn generate() -> Result<Self> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = IdentityPublicKey(signing_key.verifying_key().to_bytes());
        Ok(Self {
            public,
            secret_seed: signing_key.to_bytes(),
        })
    }

    /// Reconstruct from a 32-byte seed (e.g. loaded from an external
    /// identity-key store; persistence itself is an external collaborator).
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = seed
            .try_into()
            .map_err(|_| E2eeError::InvalidKey("identity seed must be 32 bytes".into()))?;
        let signing_key = SigningKey::from_bytes(&arr);
        let public = IdentityPublicKey(signing_key.verifying_key().to_bytes());
        Ok(Self {
            public,
            secret_seed: arr,
        })
    }

    pub fn public(&self) -> IdentityPublicKey {
        self.public
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret_seed)
    }

    /// Sign arbitrary bytes with the identity key; returns a 64-byte raw
    /// Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.signing_key().sign(msg).to_bytes()
    }

    /// Verify a signature made by any Ed25519 public key.
    pub fn verify(public: &IdentityPublicKey, msg: &[u8], sig_bytes: &[u8]) -> Result<()> {
        let vk = public.verifying_key()?;
        let sig_arr: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| E2eeError::InvalidKey("signature must be 64 bytes".into()))?;
        let sig = Signature::from_bytes(&sig_arr);
        vk.verify(msg, &sig).map_err(|_| E2eeError::BadSignature)
    }

    /// Convert this identity's X25519 key-agreement secret deterministically
    /// from the Ed25519 secret (RFC 7748 §5 clamped SHA-512 expansion, the
    /// same birational conversion libsignal and this crate's teacher use).
    pub fn agreement_secret(&self) -> StaticSecret {
        ed25519_secret_to_x25519(&self.secret_seed)
    }

    /// The X25519 public key corresponding to `agreement_secret()`.
    pub fn agreement_public(&self) -> Result<X25519Public> {
        agreement_public_from_identity_public(&self.public)
    }
}

/// Convert an Ed25519 signing seed to an X25519 static secret.
///
/// This is deterministic: the same seed always yields the same X25519
/// secret, which is required so both parties in a session derive the same
/// shared secret regardless of who computes first.
fn ed25519_secret_to_x25519(seed: &[u8; 32]) -> StaticSecret {
    let mut expanded = Sha512::digest(seed);
    expanded[0] &= 248;
    expanded[31] &= 127;
    expanded[31] |= 64;
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&expanded[..32]);
    expanded.as_mut_slice().zeroize();
    StaticSecret::from(scalar)
}

/// Convert an Ed25519 verifying (public) key to its X25519 public
/// counterpart via the birational map from the twisted Edwards curve to
/// Curve25519 (Montgomery form). This is the standalone public-point
/// conversion — never derived by smuggling a zeroed "dummy" secret key
/// through a keypair-conversion routine, which is a known footgun in some
/// JS E2EE implementations.
pub fn agreement_public_from_identity_public(
    verify_key: &IdentityPublicKey,
) -> Result<X25519Public> {
    let compressed = CompressedEdwardsY::from_slice(verify_key.as_bytes())
        .map_err(|_| E2eeError::InvalidKey("invalid Ed25519 public key encoding".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| E2eeError::InvalidKey("Ed25519 public key does not decompress".into()))?;
    if point.is_identity() {
        return Err(E2eeError::InvalidKey(
            "identity point is not a valid key-agreement key".into(),
        ));
    }
    let montgomery = point.to_montgomery();
    Ok(X25519Public::from(montgomery.to_bytes()))
}

/// DID method `key` with the Ed25519 multicodec prefix (`0xED 0x01`) encoded
/// as `did:key:z<multibase>`. Any other method or malformed suffix is
/// rejected outright — there is no silent fallback.
pub fn resolve_did(did: &str) -> Result<IdentityPublicKey> {
    let suffix = did
        .strip_prefix("did:key:")
        .ok_or_else(|| E2eeError::UnsupportedDid(did.to_string()))?;

    let (_base, decoded) = multibase::decode(suffix)
        .map_err(|e| E2eeError::UnsupportedDid(format!("bad multibase suffix: {e}")))?;

    if decoded.len() != 34 || decoded[0] != 0xed || decoded[1] != 0x01 {
        return Err(E2eeError::UnsupportedDid(format!(
            "did:key suffix is not an Ed25519 multicodec key: {did}"
        )));
    }

    IdentityPublicKey::from_bytes(&decoded[2..])
}

/// Encode an identity public key as a `did:key:z...` DID.
pub fn did_from_public_key(public: &IdentityPublicKey) -> String {
    let mut prefixed = Vec::with_capacity(34);
    prefixed.push(0xed);
    prefixed.push(0x01);
    prefixed.extend_from_slice(public.as_bytes());
    format!("did:key:{}", multibase::encode(multibase::Base::Base58Btc, prefixed))
}
