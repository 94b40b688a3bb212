use thiserror::Error;

/// Envelope/codec error taxonomy, distinct from `e2ee_crypto::E2eeError` but
/// wrapping it for anything that bubbles up from identity or session
/// operations performed while building or verifying an envelope.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("envelope signature is invalid")]
    BadSignature,

    #[error("sender identity does not resolve to the attached verify key")]
    IdentityMismatch,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error(transparent)]
    Crypto(#[from] e2ee_crypto::E2eeError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
