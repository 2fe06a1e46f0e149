//! Authenticated encryption of claim sets into URL-safe opaque strings.
//!
//! Wire layout is `nonce (12) || tag (16) || ciphertext`, base64url encoded
//! without padding so tokens survive query strings and deep links. A fresh
//! nonce is drawn per seal, so two seals of identical claims never produce
//! the same token and tokens cannot be used as a correlation fingerprint.

use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};

use super::{Error, KEY_LEN};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Seal a claim set into an opaque token.
///
/// # Errors
/// Returns `Error::Json` if the claims cannot be serialized.
pub fn seal<C: Serialize>(claims: &C, key: &[u8; KEY_LEN]) -> Result<String, Error> {
    let plaintext = serde_json::to_vec(claims)?;

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    // encrypt() appends the Poly1305 tag; re-order to nonce || tag || body
    let sealed = cipher
        .encrypt(nonce, plaintext.as_slice())
        .map_err(|_| Error::Integrity)?;
    let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

    let mut wire = Vec::with_capacity(NONCE_LEN + TAG_LEN + body.len());
    wire.extend_from_slice(&nonce_bytes);
    wire.extend_from_slice(tag);
    wire.extend_from_slice(body);

    Ok(Base64UrlUnpadded::encode_string(&wire))
}

/// Open a sealed token back into its claim set.
///
/// JSON decoding is attempted only after authentication succeeds, so
/// malformed plaintext can never become a decryption oracle. Expiry is the
/// caller's job, via [`super::ensure_fresh`].
///
/// # Errors
/// `Error::Malformed` if the input is not codec output at all,
/// `Error::Integrity` if authentication fails.
pub fn open<C: DeserializeOwned>(token: &str, key: &[u8; KEY_LEN]) -> Result<C, Error> {
    let wire = Base64UrlUnpadded::decode_vec(token).map_err(|_| Error::Malformed)?;

    if wire.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::Malformed);
    }

    let (nonce_bytes, rest) = wire.split_at(NONCE_LEN);
    let (tag, body) = rest.split_at(TAG_LEN);

    let mut sealed = Vec::with_capacity(body.len() + TAG_LEN);
    sealed.extend_from_slice(body);
    sealed.extend_from_slice(tag);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), sealed.as_slice())
        .map_err(|_| Error::Integrity)?;

    Ok(serde_json::from_slice(&plaintext)?)
}
