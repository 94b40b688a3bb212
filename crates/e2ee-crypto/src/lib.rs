//! Session-level end-to-end encryption core: identity key agreement, a
//! bounded session store, and a symmetric channel built on XChaCha20-Poly1305.
//!
//! No Diffie-Hellman ratchet. Forward secrecy, where enabled, comes from
//! whole-session rotation on a timer, not a per-message chain (§9).

pub mod aead;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod manager;
pub mod session;

pub use channel::EncryptedPayload;
pub use config::SessionManagerConfig;
pub use error::{E2eeError, Result};
pub use event::{Disposer, Event, EventBus, ExpiryReason, Topic};
pub use identity::{IdentityKeyPair, IdentityPublicKey};
pub use manager::SessionManager;
pub use session::{Session, SessionStore};
