use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input is not codec output at all: bad encoding or too short to carry a
    /// nonce and tag.
    #[error("malformed token")]
    Malformed,
    /// Ciphertext failed authentication: tampered, truncated or wrong key.
    #[error("token integrity check failed")]
    Integrity,
    /// Authentic token past its expiry window.
    #[error("token expired")]
    Expired,
    #[error("invalid claims json")]
    Json(#[from] serde_json::Error),
}
