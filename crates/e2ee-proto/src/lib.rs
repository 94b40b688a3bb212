//! Wire envelope construction, canonicalization, and signing for the agent
//! E2EE protocol, built on top of `e2ee_crypto`'s identity and session types.

pub mod envelope;
pub mod error;
pub mod value;

pub use envelope::{
    encrypted_payload_to_map, map_to_encrypted_payload, sign, verify, Envelope, EnvelopeType, Participant,
    SignedEnvelope,
};
pub use error::{ProtoError, Result};
pub use value::Value;
