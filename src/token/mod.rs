//! Scan-session token core: AEAD codec, claim schema and key derivation.
//!
//! Tokens are sealed once when an anonymous scanner proves a fact about a
//! vehicle, then decrypted by every downstream contact action until they
//! expire. They are never stored and never revoked; the short TTL bounds a
//! compromised token.

mod claims;
mod codec;
mod error;

pub use claims::{
    ensure_fresh, OtpChallengeClaims, SessionClaims, OTP_TTL_SECONDS, SESSION_TTL_SECONDS,
};
pub use codec::{open, seal};
pub use error::Error;

use sha2::{Digest, Sha256};

pub const KEY_LEN: usize = 32;

/// Derive the fixed-length AEAD key from an operator-supplied secret of any
/// length.
#[must_use]
pub fn derive_key(secret: &str) -> [u8; KEY_LEN] {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&digest);
    key
}
