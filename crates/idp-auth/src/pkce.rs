//! PKCE (Proof Key for Code Exchange) per RFC 7636, plus CSRF state values
//!
//! The verifier stays on the client (session-scoped storage) and is sent with
//! the code exchange; the S256 challenge goes into the authorization URL so
//! the server can check both requests came from the same party.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{AuthError, Result};

/// Random bytes behind a verifier (43 base64url characters).
const VERIFIER_BYTES: usize = 32;

/// Random bytes behind a CSRF state value.
const STATE_BYTES: usize = 24;

/// A verifier with its derived S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self { verifier, challenge }
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes encoded as URL-safe base64 without padding: 43 characters
/// from `[A-Za-z0-9_-]`, the RFC 7636 minimum length.
pub fn generate_verifier() -> String {
    random_token::<VERIFIER_BYTES>()
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`, 43 characters.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an opaque single-use CSRF state value.
pub fn generate_state() -> String {
    random_token::<STATE_BYTES>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Query parameters of an authorization request.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: Option<&'a str>,
    pub state: Option<&'a str>,
    /// S256 challenge; adds `code_challenge_method=S256` when present
    pub code_challenge: Option<&'a str>,
}

/// Build the authorization URL for `endpoint` with all OAuth parameters.
///
/// Existing query parameters on `endpoint` are preserved.
pub fn build_authorization_url(endpoint: &str, params: &AuthorizeParams<'_>) -> Result<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| AuthError::config(format!("invalid authorize endpoint {endpoint}: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", params.client_id)
            .append_pair("redirect_uri", params.redirect_uri)
            .append_pair("response_type", "code");
        if let Some(scope) = params.scope {
            query.append_pair("scope", scope);
        }
        if let Some(state) = params.state {
            query.append_pair("state", state);
        }
        if let Some(challenge) = params.code_challenge {
            query
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
        }
    }
    Ok(url)
}
