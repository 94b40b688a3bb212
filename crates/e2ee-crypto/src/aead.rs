//! Authenticated encryption primitive.
//!
//! XChaCha20-Poly1305: 32-byte key, 24-byte nonce, 16-byte tag. The nonce is
//! supplied by the caller (see `channel` for the construction spec §4.4
//! requires) rather than generated here, because the per-session nonce
//! discipline — counter prefix + random suffix — is a channel-level
//! invariant, not an AEAD-level one.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::error::{E2eeError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;

pub fn encrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| E2eeError::CryptoFailure(e.to_string()))?;
    let nonce = XNonce::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| E2eeError::CryptoFailure("AEAD encryption failed".into()))
}

/// Decrypt. A MAC mismatch is reported as `AuthenticationFailure` per the
/// error taxonomy (tampering, wrong key, or wrong nonce are indistinguishable
/// to the caller, by design).
pub fn decrypt(key: &[u8; KEY_LEN], nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| E2eeError::CryptoFailure(e.to_string()))?;
    let nonce = XNonce::from_slice(nonce);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| E2eeError::AuthenticationFailure)
}
