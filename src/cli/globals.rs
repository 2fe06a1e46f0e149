use secrecy::SecretString;

/// Process-wide secrets, resolved once at startup. The token secret is
/// consumed by the services that seal/open scan-session tokens through this
/// crate; the gateway itself only verifies owner JWTs.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub token_secret: SecretString,
    pub jwt_secret: SecretString,
    /// True when the deterministic dev fallback secrets are in use.
    pub dev_secrets: bool,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(token_secret: SecretString, jwt_secret: SecretString, dev_secrets: bool) -> Self {
        Self {
            token_secret,
            jwt_secret,
            dev_secrets,
        }
    }
}
