//! Symmetric encrypt/decrypt over a session's shared secret (§4.4).
//!
//! Nonce layout (24 bytes total, matching XChaCha20-Poly1305):
//!   bytes[0..4]   = little-endian `nonce_counter` AFTER increment
//!   bytes[4..24]  = 20 bytes of fresh `OsRng` randomness
//!
//! The counter prefix gives in-session monotonicity (and lets a peer detect
//! replay/out-of-order delivery); the random suffix keeps nonces unique
//! across sessions even when two freshly-created sessions both start their
//! counter at zero. If the counter width ever changes, the random portion
//! MUST shrink to keep the total at 24 bytes — this is why both widths are
//! named constants rather than derived from `NONCE_LEN`.

use chrono::Utc;
use rand::RngCore;

use crate::aead;
use crate::error::{E2eeError, Result};
use crate::event::{Event, EventBus};
use crate::session::Session;

const COUNTER_LEN: usize = 4;
const RANDOM_SUFFIX_LEN: usize = aead::NONCE_LEN - COUNTER_LEN;

/// Ciphertext plus the metadata needed to decrypt and order it.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; aead::NONCE_LEN],
    /// Counter value AFTER encryption — the first message on a session
    /// carries `sequence == 1`.
    pub sequence: u32,
    pub timestamp: i64,
}

fn build_nonce(counter: u32) -> [u8; aead::NONCE_LEN] {
    let mut nonce = [0u8; aead::NONCE_LEN];
    nonce[..COUNTER_LEN].copy_from_slice(&counter.to_le_bytes());
    rand::rngs::OsRng.fill_bytes(&mut nonce[COUNTER_LEN..COUNTER_LEN + RANDOM_SUFFIX_LEN]);
    nonce
}

/// Encrypt `plaintext` under `session`'s shared secret, advancing the
/// session's nonce counter. Emits `message:encrypted` on success.
pub fn encrypt(session: &mut Session, plaintext: &[u8], events: &EventBus) -> Result<EncryptedPayload> {
    session.nonce_counter = session
        .nonce_counter
        .checked_add(1)
        .ok_or_else(|| E2eeError::CryptoFailure("nonce counter exhausted".into()))?;
    let sequence = session.nonce_counter;
    let nonce = build_nonce(sequence);

    let ciphertext = aead::encrypt(session.shared_secret(), &nonce, plaintext, session.session_id.as_bytes())?;
    let timestamp = Utc::now().timestamp_millis();

    events.emit(Event::MessageEncrypted {
        session_id: session.session_id.clone(),
        sequence,
        at: Utc::now(),
    });

    Ok(EncryptedPayload {
        ciphertext,
        nonce,
        sequence,
        timestamp,
    })
}

/// Decrypt a payload previously produced by `encrypt` for the peer side of
/// this session. Emits `message:decrypted` on success.
///
/// `enforce_replay_order` enables the §7/§8 hardening that rejects a
/// sequence number that is not strictly greater than the highest one this
/// session has already accepted.
pub fn decrypt(
    session: &mut Session,
    payload: &EncryptedPayload,
    events: &EventBus,
    enforce_replay_order: bool,
) -> Result<Vec<u8>> {
    if payload.nonce.len() != aead::NONCE_LEN {
        return Err(E2eeError::MalformedPayload("nonce must be 24 bytes".into()));
    }
    if payload.ciphertext.len() < 16 {
        return Err(E2eeError::MalformedPayload("ciphertext shorter than AEAD tag".into()));
    }

    if enforce_replay_order && payload.sequence <= session.recv_high_water {
        return Err(E2eeError::ReplayDetected {
            expected: session.recv_high_water,
            got: payload.sequence,
        });
    }

    let plaintext = aead::decrypt(
        session.shared_secret(),
        &payload.nonce,
        &payload.ciphertext,
        session.session_id.as_bytes(),
    )?;

    if enforce_replay_order {
        session.recv_high_water = payload.sequence;
    }

    events.emit(Event::MessageDecrypted {
        session_id: session.session_id.clone(),
        sequence: payload.sequence,
        at: Utc::now(),
    });

    Ok(plaintext)
}
