//! Token endpoint interactions
//!
//! Two calls produce a new token pair:
//! 1. Authorization code exchange (`/oauth/token`, form-encoded, raw OAuth2 JSON)
//! 2. Silent refresh (`/api/auth/refresh`, JSON envelope)

use common::Secret;
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};
use transport::HttpTransport;

use crate::envelope;
use crate::error::{AuthError, ErrorCode, Result};

/// Access/refresh token pair as issued by the server.
///
/// `expires_in` is a delta in seconds from the response time. The refresh
/// token is wrapped in [`Secret`] so it never shows up in `Debug` output.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Raw OAuth2 token endpoint body (success or error form).
#[derive(Debug, Deserialize)]
struct OAuthTokenBody {
    access_token: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<Secret<String>>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Parameters of an `authorization_code` grant.
#[derive(Debug, Clone)]
pub struct CodeExchangeParams<'a> {
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
    /// PKCE verifier, when the flow was started with a challenge
    pub code_verifier: Option<&'a str>,
}

/// Exchange an authorization code for tokens.
///
/// A provider `error` field is surfaced verbatim as the error code, with
/// `error_description` as the message.
pub async fn exchange_code(
    transport: &HttpTransport,
    token_endpoint: &str,
    params: &CodeExchangeParams<'_>,
) -> Result<TokenPair> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", params.code),
        ("redirect_uri", params.redirect_uri),
        ("client_id", params.client_id),
    ];
    if let Some(secret) = params.client_secret {
        form.push(("client_secret", secret));
    }
    if let Some(verifier) = params.code_verifier {
        form.push(("code_verifier", verifier));
    }

    debug!(
        token_endpoint,
        pkce = params.code_verifier.is_some(),
        "exchanging authorization code"
    );
    let response = transport
        .send(transport.request(Method::POST, token_endpoint).form(&form))
        .await?;

    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| AuthError::new(ErrorCode::NetworkError, format!("reading token response: {e}")))?;

    parse_token_body(status, &body)
}

fn parse_token_body(status: u16, body: &str) -> Result<TokenPair> {
    let parsed: OAuthTokenBody = serde_json::from_str(body).map_err(|e| {
        if (200..300).contains(&status) {
            AuthError::invalid_response(format!("invalid token response: {e}")).with_status(status)
        } else {
            AuthError::new(ErrorCode::RequestFailed, format!("token endpoint returned {status}"))
                .with_status(status)
        }
    })?;

    if let Some(code) = parsed.error {
        let message = parsed.error_description.unwrap_or_else(|| code.clone());
        warn!(status, error = %code, "token endpoint rejected the exchange");
        return Err(AuthError::new(ErrorCode::from(code.as_str()), message).with_status(status));
    }

    if !(200..300).contains(&status) {
        return Err(
            AuthError::new(ErrorCode::RequestFailed, format!("token endpoint returned {status}"))
                .with_status(status),
        );
    }

    let access_token = parsed
        .access_token
        .ok_or_else(|| AuthError::invalid_response("token response has no access_token").with_status(status))?;

    Ok(TokenPair {
        access_token,
        refresh_token: parsed.refresh_token,
        expires_in: parsed.expires_in,
    })
}

/// Exchange a refresh token for a new pair.
///
/// Server rejections map to `REFRESH_FAILED` (the server's own code is kept in
/// `details`). Transport and decoding failures map to `REFRESH_ERROR`, as does
/// a 5xx without a server error code (the server could not answer).
pub async fn refresh_token(
    transport: &HttpTransport,
    refresh_url: &str,
    refresh: &Secret<String>,
) -> Result<TokenPair> {
    let request = transport
        .request(Method::POST, refresh_url)
        .json(&serde_json::json!({ "refresh_token": refresh.expose() }));

    let response = transport.send(request).await.map_err(|e| {
        AuthError::new(ErrorCode::RefreshError, format!("token refresh request failed: {e}"))
    })?;

    envelope::read_data::<TokenPair>(response)
        .await
        .map_err(|e| match e.code {
            ErrorCode::NetworkError | ErrorCode::InvalidResponse => AuthError {
                code: ErrorCode::RefreshError,
                ..e
            },
            ErrorCode::RequestFailed if e.status_code.is_some_and(|status| status >= 500) => {
                AuthError {
                    code: ErrorCode::RefreshError,
                    ..e
                }
            }
            _ => {
                let server_code = e.code.to_string();
                AuthError {
                    code: ErrorCode::RefreshFailed,
                    details: Some(serde_json::json!({ "server_code": server_code })),
                    ..e
                }
            }
        })
}
