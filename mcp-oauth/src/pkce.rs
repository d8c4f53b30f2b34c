//! PKCE (RFC 7636) verifier/challenge generation and CSRF state tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Digest;
use sha2::Sha256;

const VERIFIER_LEN: usize = 64;
const STATE_LEN: usize = 32;

/// A cryptographically random verifier string, 43-128 chars per RFC 7636.
pub fn generate_code_verifier() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// `BASE64URL-ENCODE(SHA256(verifier))`, the `S256` challenge method.
pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// A fresh opaque CSRF token for the `state` query parameter.
pub fn generate_csrf_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LEN)
        .map(char::from)
        .collect()
}
