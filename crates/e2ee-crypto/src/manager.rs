//! `SessionManager`: the public façade described in §2. Everything a caller
//! needs — identity, session establishment, encrypt/decrypt, and event
//! subscription — goes through one handle.

use std::sync::Arc;

use crate::channel;
use crate::config::SessionManagerConfig;
use crate::error::Result;
use crate::event::{Disposer, Event, EventBus, Topic};
use crate::identity::{self, IdentityKeyPair, IdentityPublicKey};
use crate::session::{compute_session_id, Session, SessionStore};

pub use crate::channel::EncryptedPayload;

/// Single entry point for the session lifecycle of one local identity.
///
/// Cloning is cheap: the store and event bus are reference-counted, so a
/// `SessionManager` can be shared across worker threads the way callers
/// already expect to share connection pools or clients.
#[derive(Clone)]
pub struct SessionManager {
    local_identity: Arc<IdentityKeyPair>,
    store: Arc<SessionStore>,
    events: EventBus,
}

impl SessionManager {
    /// Generate a fresh long-term identity and start the manager.
    pub fn new(config: SessionManagerConfig) -> Result<Self> {
        let local_identity = Arc::new(IdentityKeyPair::generate()?);
        Ok(Self::from_identity(local_identity, config))
    }

    /// Start the manager from an already-provisioned identity (e.g. loaded
    /// from an external key store — persistence is an external collaborator,
    /// not something this crate owns).
    pub fn from_identity(local_identity: Arc<IdentityKeyPair>, config: SessionManagerConfig) -> Self {
        let events = EventBus::new();
        let store = SessionStore::new(config, events.clone());
        Self {
            local_identity,
            store,
            events,
        }
    }

    pub fn local_public(&self) -> IdentityPublicKey {
        self.local_identity.public()
    }

    pub fn local_did(&self) -> String {
        identity::did_from_public_key(&self.local_identity.public())
    }

    /// Resolve a `did:key:...` string to an identity public key without
    /// establishing a session.
    pub fn resolve_did(&self, did: &str) -> Result<IdentityPublicKey> {
        identity::resolve_did(did)
    }

    /// Resolve `remote_did` and return the existing session for this
    /// identity pair if one is present and unexpired, touching its
    /// `last_activity_at` (§4.3 step 2). Only when absent or idle-expired is
    /// a fresh session derived and inserted (§4.3 steps 3-6).
    ///
    /// Re-establishing an already-active session must be a no-op beyond the
    /// activity touch: falling through to `Session::establish`/`store.put`
    /// unconditionally would make `SessionStore::put` treat the existing id
    /// as a rotation, resetting `nonce_counter` and `recv_high_water` to 0
    /// even though the session never actually expired — silently
    /// desynchronizing replay state with a peer who did not also re-derive.
    pub fn establish_session(&self, remote_did: &str) -> Result<String> {
        let remote_public = identity::resolve_did(remote_did)?;
        let session_id = compute_session_id(&self.local_identity.public(), &remote_public);

        if self.store.get_for_read(&session_id, |_| ()).is_ok() {
            return Ok(session_id);
        }

        let session = Session::establish(Arc::clone(&self.local_identity), remote_did.to_string(), remote_public)?;
        self.store.put(session);
        Ok(session_id)
    }

    /// Encrypt `plaintext` for an established session, advancing its nonce
    /// counter under the store's lock.
    pub fn encrypt(&self, session_id: &str, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let events = self.events.clone();
        self.store
            .with_mut(session_id, |session| channel::encrypt(session, plaintext, &events))
    }

    /// Decrypt a payload addressed to an established session. Rejects
    /// sequence numbers at or below the highest already accepted (I8).
    pub fn decrypt(&self, session_id: &str, payload: &EncryptedPayload) -> Result<Vec<u8>> {
        let events = self.events.clone();
        self.store
            .with_mut(session_id, |session| channel::decrypt(session, payload, &events, true))
    }

    /// Explicitly tear down a session, independent of idle expiry.
    pub fn terminate_session(&self, session_id: &str) {
        self.store.terminate(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Subscribe to lifecycle and traffic events (§4.6). The returned
    /// `Disposer` must be kept or explicitly disposed; dropping it leaves the
    /// subscription active.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Disposer
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(topic, handler)
    }

    /// Stop background sweepers. Safe to call more than once.
    pub fn stop(&self) {
        self.store.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> SessionManager {
        SessionManager::new(SessionManagerConfig::default()).unwrap()
    }

    #[test]
    fn establish_encrypt_decrypt_roundtrip() {
        let alice = manager();
        let bob = manager();

        let session_id = alice.establish_session(&bob.local_did()).unwrap();
        let bob_session_id = bob.establish_session(&alice.local_did()).unwrap();
        assert_eq!(session_id, bob_session_id);

        let payload = alice.encrypt(&session_id, b"hi bob").unwrap();
        let plaintext = bob.decrypt(&bob_session_id, &payload).unwrap();
        assert_eq!(plaintext, b"hi bob");

        alice.stop();
        bob.stop();
    }

    #[test]
    fn re_establishing_an_active_session_does_not_reset_counters() {
        let alice = manager();
        let bob = manager();

        let session_id = alice.establish_session(&bob.local_did()).unwrap();
        alice.encrypt(&session_id, b"one").unwrap();
        alice.encrypt(&session_id, b"two").unwrap();

        // A redundant establish for the same, still-active pair must be a
        // no-op: it must not be treated as a rotation.
        let again = alice.establish_session(&bob.local_did()).unwrap();
        assert_eq!(again, session_id);

        let payload = alice.encrypt(&session_id, b"three").unwrap();
        assert_eq!(payload.sequence, 3);

        alice.stop();
        bob.stop();
    }

    #[test]
    fn unknown_session_is_reported() {
        let alice = manager();
        let err = alice.encrypt("not-a-real-session", b"x").unwrap_err();
        assert!(matches!(err, crate::error::E2eeError::SessionNotFound(_)));
        alice.stop();
    }

    #[test]
    fn events_fire_on_establish_and_traffic() {
        let alice = manager();
        let bob = manager();
        let created = Arc::new(AtomicUsize::new(0));
        let created_clone = Arc::clone(&created);
        let _disposer = alice.subscribe(Topic::SessionCreated, move |_| {
            created_clone.fetch_add(1, Ordering::SeqCst);
        });

        let session_id = alice.establish_session(&bob.local_did()).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let encrypted = Arc::new(AtomicUsize::new(0));
        let encrypted_clone = Arc::clone(&encrypted);
        let _disposer2 = alice.subscribe(Topic::MessageEncrypted, move |_| {
            encrypted_clone.fetch_add(1, Ordering::SeqCst);
        });
        alice.encrypt(&session_id, b"ping").unwrap();
        assert_eq!(encrypted.load(Ordering::SeqCst), 1);

        alice.stop();
        bob.stop();
    }
}
