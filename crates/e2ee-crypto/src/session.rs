//! Session identifiers, session state, and the bounded in-memory session
//! store (§3, §4.2, §4.3).

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sha2::{Digest, Sha512};
use x25519_dalek::PublicKey as X25519Public;

use crate::config::SessionManagerConfig;
use crate::error::{E2eeError, Result};
use crate::event::{EventBus, Event, ExpiryReason};
use crate::identity::{self, IdentityKeyPair, IdentityPublicKey};

/// Deterministic 16-byte session tag, base64-encoded. Commutative: the
/// same two identity keys always produce the same id regardless of which
/// party computes it (I4 / P1).
pub fn compute_session_id(a: &IdentityPublicKey, b: &IdentityPublicKey) -> String {
    let (first, second) = if a.as_bytes() <= b.as_bytes() { (a, b) } else { (b, a) };
    let mut hasher = Sha512::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

/// A binding between two identity keys, a derived symmetric secret, and a
/// nonce counter — the unit over which encrypt and decrypt operate.
///
/// `shared_secret` is never exposed outside the crate and is omitted from
/// `Debug` output (I3).
pub struct Session {
    pub session_id: String,
    pub remote_did: String,
    pub remote_verify_key: IdentityPublicKey,
    local_identity: Arc<IdentityKeyPair>,
    shared_secret: [u8; 32],
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub nonce_counter: u32,
    /// Highest `sequence` accepted by `decrypt` so far, for the replay
    /// hardening described in §7/§8 (0 means none accepted yet).
    pub recv_high_water: u32,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("remote_did", &self.remote_did)
            .field("created_at", &self.created_at)
            .field("last_activity_at", &self.last_activity_at)
            .field("nonce_counter", &self.nonce_counter)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.shared_secret.zeroize();
    }
}

impl Session {
    /// Establish a session given the local identity and the remote party's
    /// resolved identity (§4.3).
    pub fn establish(
        local_identity: Arc<IdentityKeyPair>,
        remote_did: String,
        remote_verify_key: IdentityPublicKey,
    ) -> Result<Self> {
        let session_id = compute_session_id(&local_identity.public(), &remote_verify_key);
        let shared_secret = derive_shared_secret(&local_identity, &remote_verify_key)?;
        let now = Utc::now();
        Ok(Self {
            session_id,
            remote_did,
            remote_verify_key,
            local_identity,
            shared_secret,
            created_at: now,
            last_activity_at: now,
            nonce_counter: 0,
            recv_high_water: 0,
        })
    }

    /// Forward-secrecy rotation: re-derive the shared secret for the same
    /// identity pair and reset the nonce counter. The session id is
    /// unchanged, since it is a deterministic function of the two identity
    /// keys (I4) — only the key material and counters are fresh.
    pub fn rotate(&mut self) -> Result<()> {
        let shared_secret = derive_shared_secret(&self.local_identity, &self.remote_verify_key)?;
        use zeroize::Zeroize;
        self.shared_secret.zeroize();
        self.shared_secret = shared_secret;
        let now = Utc::now();
        self.created_at = now;
        self.last_activity_at = now;
        self.nonce_counter = 0;
        self.recv_high_water = 0;
        Ok(())
    }

    pub(crate) fn shared_secret(&self) -> &[u8; 32] {
        &self.shared_secret
    }

    fn is_idle_expired(&self, timeout_ms: u64, now: DateTime<Utc>) -> bool {
        let idle = now - self.last_activity_at;
        idle.num_milliseconds() > timeout_ms as i64
    }

    fn age_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_milliseconds()
    }
}

fn derive_shared_secret(local: &IdentityKeyPair, remote: &IdentityPublicKey) -> Result<[u8; 32]> {
    let local_secret = local.agreement_secret();
    let remote_public: X25519Public = identity::agreement_public_from_identity_public(remote)?;
    let shared = local_secret.diffie_hellman(&remote_public);
    if shared.as_bytes().iter().all(|b| *b == 0) {
        return Err(E2eeError::InvalidKey(
            "X25519 agreement produced the all-zero point".into(),
        ));
    }
    Ok(*shared.as_bytes())
}

/// Bounded, LRU-evicting, idle-expiring in-memory session map with an
/// optional background forward-secrecy rotation sweep (§4.2, §5).
pub struct SessionStore {
    config: SessionManagerConfig,
    sessions: Mutex<HashMap<String, Session>>,
    events: EventBus,
    sweepers: Mutex<Vec<Sweeper>>,
}

struct Sweeper {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SessionStore {
    pub fn new(config: SessionManagerConfig, events: EventBus) -> Arc<Self> {
        let store = Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            events,
            sweepers: Mutex::new(Vec::new()),
        });
        store.spawn_sweepers();
        store
    }

    fn spawn_sweepers(self: &Arc<Self>) {
        let mut sweepers = self.sweepers.lock();

        let idle_store = Arc::clone(self);
        let idle_interval = Duration::from_millis(self.config.sweep_interval_ms.max(1));
        let (idle_stop_tx, idle_stop_rx) = mpsc::channel();
        let idle_handle = std::thread::spawn(move || loop {
            match idle_stop_rx.recv_timeout(idle_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => idle_store.sweep_idle(),
            }
        });
        sweepers.push(Sweeper {
            stop: idle_stop_tx,
            handle: idle_handle,
        });

        if self.config.enable_forward_secrecy {
            let rot_store = Arc::clone(self);
            let rot_interval = Duration::from_millis(self.config.key_rotation_interval_ms.max(1));
            let (rot_stop_tx, rot_stop_rx) = mpsc::channel();
            let rot_handle = std::thread::spawn(move || loop {
                match rot_stop_rx.recv_timeout(rot_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => rot_store.sweep_rotation(),
                }
            });
            sweepers.push(Sweeper {
                stop: rot_stop_tx,
                handle: rot_handle,
            });
        }
    }

    /// Halts background sweepers and marks the store refusing further
    /// sweeps. Encrypt/decrypt calls made through a manager after `stop()`
    /// are the caller's responsibility to gate (§5).
    pub fn stop(&self) {
        let mut sweepers = self.sweepers.lock();
        for sweeper in sweepers.drain(..) {
            let _ = sweeper.stop.send(());
            let _ = sweeper.handle.join();
        }
    }

    fn sweep_idle(&self) {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, s)| s.is_idle_expired(self.config.session_timeout_ms, now))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in expired {
            let removed = self.sessions.lock().remove(&id);
            if removed.is_some() {
                tracing::debug!(session_id = %id, "idle session swept");
                self.events.emit(Event::SessionExpired {
                    session_id: id,
                    reason: ExpiryReason::Idle,
                    at: now,
                });
            }
        }
    }

    fn sweep_rotation(&self) {
        let now = Utc::now();
        let due: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(_, s)| s.age_ms(now) > self.config.key_rotation_interval_ms as i64)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in due {
            let mut sessions = self.sessions.lock();
            if let Some(session) = sessions.get_mut(&id) {
                if session.rotate().is_ok() {
                    tracing::debug!(session_id = %id, "session rotated by sweep");
                    drop(sessions);
                    self.events.emit(Event::SessionRotated {
                        old_session_id: id.clone(),
                        new_session_id: id,
                        at: now,
                    });
                }
            }
        }
    }

    /// Returns the session if present and not idle-expired, touching its
    /// `last_activity_at` on success. An idle-expired session is removed
    /// and treated as absent (I6).
    pub fn get_for_read<R>(&self, session_id: &str, f: impl FnOnce(&Session) -> R) -> Result<R> {
        self.with_mut(session_id, |s| Ok(f(s)))
    }

    /// Look up a session and give the caller mutable access inside the
    /// store's single exclusive lock, held only over this short critical
    /// section (§5). Touches `last_activity_at` on success.
    pub fn with_mut<R>(&self, session_id: &str, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let expired = match sessions.get(session_id) {
            Some(s) => s.is_idle_expired(self.config.session_timeout_ms, now),
            None => return Err(E2eeError::SessionNotFound(session_id.to_string())),
        };
        if expired {
            sessions.remove(session_id);
            drop(sessions);
            self.events.emit(Event::SessionExpired {
                session_id: session_id.to_string(),
                reason: ExpiryReason::Idle,
                at: now,
            });
            return Err(E2eeError::SessionNotFound(session_id.to_string()));
        }
        let session = sessions.get_mut(session_id).expect("checked present above");
        let result = f(session)?;
        session.last_activity_at = now;
        Ok(result)
    }

    /// Insert a freshly-established session, evicting the least-recently
    /// active session if at capacity, or treating an existing id as a
    /// rotation (§4.2).
    pub fn put(&self, session: Session) {
        let id = session.session_id.clone();
        let now = Utc::now();

        let mut evicted: Option<String> = None;
        let mut existed;
        {
            let mut sessions = self.sessions.lock();
            existed = sessions.contains_key(&id);
            if !existed && sessions.len() >= self.config.max_sessions {
                if let Some(victim) = sessions
                    .iter()
                    .min_by_key(|(_, s)| s.last_activity_at)
                    .map(|(k, _)| k.clone())
                {
                    sessions.remove(&victim);
                    evicted = Some(victim);
                }
            }
            existed = existed && !evicted.as_deref().map(|v| v == id).unwrap_or(false);
            sessions.insert(id.clone(), session);
        }

        if let Some(victim) = evicted {
            tracing::debug!(session_id = %victim, "session evicted at capacity");
            self.events.emit(Event::SessionExpired {
                session_id: victim,
                reason: ExpiryReason::Eviction,
                at: now,
            });
        }

        if existed {
            tracing::debug!(session_id = %id, "session rotated via put");
            self.events.emit(Event::SessionRotated {
                old_session_id: id.clone(),
                new_session_id: id,
                at: now,
            });
        } else {
            tracing::debug!(session_id = %id, "session created");
            self.events.emit(Event::SessionCreated { session_id: id, at: now });
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicit termination, independent of idle expiry or rotation.
    pub fn terminate(&self, session_id: &str) {
        let removed = self.sessions.lock().remove(session_id);
        if removed.is_some() {
            self.events.emit(Event::SessionExpired {
                session_id: session_id.to_string(),
                reason: ExpiryReason::Explicit,
                at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair() -> (Arc<IdentityKeyPair>, IdentityPublicKey, String) {
        let kp = Arc::new(IdentityKeyPair::generate().unwrap());
        let public = kp.public();
        let did = identity::did_from_public_key(&public);
        (kp, public, did)
    }

    #[test]
    fn session_id_is_commutative() {
        let (alice, alice_pub, _) = make_pair();
        let (bob, bob_pub, _) = make_pair();
        let _ = (&alice, &bob);
        assert_eq!(compute_session_id(&alice_pub, &bob_pub), compute_session_id(&bob_pub, &alice_pub));
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let (alice, alice_pub, alice_did) = make_pair();
        let (bob, bob_pub, bob_did) = make_pair();

        let s_a = Session::establish(Arc::clone(&alice), bob_did, bob_pub).unwrap();
        let s_b = Session::establish(Arc::clone(&bob), alice_did, alice_pub).unwrap();

        assert_eq!(s_a.shared_secret(), s_b.shared_secret());
    }

    #[test]
    fn capacity_is_enforced() {
        let config = SessionManagerConfig {
            max_sessions: 2,
            ..Default::default()
        };
        let events = EventBus::new();
        let store = SessionStore::new(config, events);

        let (local, _, _) = make_pair();
        for _ in 0..3 {
            let (_, remote_pub, remote_did) = make_pair();
            let session = Session::establish(Arc::clone(&local), remote_did, remote_pub).unwrap();
            store.put(session);
        }

        assert_eq!(store.len(), 2);
        store.stop();
    }
}
