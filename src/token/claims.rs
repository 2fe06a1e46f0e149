//! Claim shapes sealed inside tokens, and the shared expiry check.
//!
//! Field names are camelCase on the wire so the Node-based contact services
//! decode the same payloads without translation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Error;

/// Scan sessions live for 30 minutes from issuance.
pub const SESSION_TTL_SECONDS: i64 = 30 * 60;

/// OTP challenges live for 5 minutes.
pub const OTP_TTL_SECONDS: i64 = 5 * 60;

/// Proof that an anonymous scanner verified a specific vehicle at a specific
/// place and time. Carries no mutable state: it is decrypted and checked,
/// never looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub vehicle_number: String,
    pub vehicle_id: String,
    /// Bound into downstream actions, never shown to the scanner.
    pub owner_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl SessionClaims {
    #[must_use]
    pub fn new(
        vehicle_number: String,
        vehicle_id: String,
        owner_id: String,
        latitude: f64,
        longitude: f64,
        now: i64,
    ) -> Self {
        Self {
            vehicle_number,
            vehicle_id,
            owner_id,
            latitude,
            longitude,
            issued_at: now,
            expires_at: now + SESSION_TTL_SECONDS,
        }
    }
}

/// Stateless OTP challenge: the auth service seals the hash of the code it
/// sent, the verify endpoint opens the token and compares hashes. Nothing is
/// stored server-side between send and verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpChallengeClaims {
    pub phone: String,
    pub otp_hash: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl OtpChallengeClaims {
    #[must_use]
    pub fn new(phone: String, code: &str, now: i64) -> Self {
        Self {
            phone,
            otp_hash: hash_code(code),
            issued_at: now,
            expires_at: now + OTP_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn verify_code(&self, candidate: &str) -> bool {
        self.otp_hash == hash_code(candidate)
    }
}

fn hash_code(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// The one shared expiry comparison. Every consumer of an opened token calls
/// this instead of comparing timestamps itself, so the semantics cannot
/// drift between services.
///
/// # Errors
/// Returns `Error::Expired` when `expires_at` is not in the future.
pub fn ensure_fresh(expires_at: i64, now: i64) -> Result<(), Error> {
    if expires_at > now {
        Ok(())
    } else {
        Err(Error::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn session_expiry_is_issuance_plus_ttl() {
        let claims = SessionClaims::new(
            "KA01AB1234".to_string(),
            "veh_01".to_string(),
            "own_01".to_string(),
            12.9716,
            77.5946,
            1_700_000_000,
        );
        assert_eq!(claims.expires_at, claims.issued_at + SESSION_TTL_SECONDS);
    }

    #[test]
    fn session_claims_use_camel_case_wire_names() -> Result<()> {
        let claims = SessionClaims::new(
            "KA01AB1234".to_string(),
            "veh_01".to_string(),
            "own_01".to_string(),
            12.9716,
            77.5946,
            1_700_000_000,
        );
        let value = serde_json::to_value(&claims)?;
        assert!(value.get("vehicleNumber").is_some());
        assert!(value.get("ownerId").is_some());
        assert!(value.get("expiresAt").is_some());
        assert!(value.get("vehicle_number").is_none());
        Ok(())
    }

    #[test]
    fn ensure_fresh_accepts_future_expiry() {
        assert!(ensure_fresh(1_000, 999).is_ok());
    }

    #[test]
    fn ensure_fresh_rejects_past_and_present_expiry() {
        assert!(matches!(ensure_fresh(1_000, 1_000), Err(Error::Expired)));
        assert!(matches!(ensure_fresh(1_000, 1_001), Err(Error::Expired)));
    }

    #[test]
    fn expired_token_still_opens_structurally() -> Result<()> {
        let key = crate::token::derive_key("test-secret");
        let claims = SessionClaims::new(
            "KA01AB1234".to_string(),
            "veh_01".to_string(),
            "own_01".to_string(),
            0.0,
            0.0,
            1_000,
        );
        let sealed = crate::token::seal(&claims, &key)?;
        let opened: SessionClaims = crate::token::open(&sealed, &key)?;
        assert!(matches!(
            ensure_fresh(opened.expires_at, claims.expires_at + 1),
            Err(Error::Expired)
        ));
        Ok(())
    }

    #[test]
    fn otp_challenge_verifies_matching_code_only() {
        let challenge = OtpChallengeClaims::new("+919876543210".to_string(), "482913", 1_000);
        assert!(challenge.verify_code("482913"));
        assert!(!challenge.verify_code("482914"));
        assert_eq!(challenge.expires_at, 1_000 + OTP_TTL_SECONDS);
    }
}
