use thiserror::Error;

/// Unified error type for the session core.
///
/// Every variant corresponds to one error kind in the taxonomy: cryptographic
/// failures are surfaced immediately and untransformed, never retried, never
/// downgraded to a default.
#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("unsupported DID method or malformed DID: {0}")]
    UnsupportedDid(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("secure random number generator unavailable: {0}")]
    CryptoUnavailable(String),

    #[error("session not found or expired: {0}")]
    SessionNotFound(String),

    #[error("authentication failed (MAC or signature mismatch)")]
    AuthenticationFailure,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("envelope signature is invalid")]
    BadSignature,

    #[error("sender identity does not resolve to the attached verify key")]
    IdentityMismatch,

    #[error("replay detected: sequence {got} is not strictly greater than {expected}")]
    ReplayDetected { expected: u32, got: u32 },

    #[error("underlying cryptographic primitive failed: {0}")]
    CryptoFailure(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, E2eeError>;
