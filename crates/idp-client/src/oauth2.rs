//! Direct OAuth2 authorization-code flow against the authentication server
//!
//! Same-origin alternative to SSO: authorize and token endpoints live under
//! `api_url`. PKCE is opt-in here.

use idp_auth::{
    AUTHORIZE_PATH, AuthorizeParams, CodeExchangeParams, LoginResult, PKCE_VERIFIER_KEY,
    PkcePair, Result, TOKEN_PATH, build_authorization_url, endpoint, exchange_code,
};
use tracing::{debug, info};
use url::Url;

use crate::client::AuthClient;

#[derive(Debug, Clone, Default)]
pub struct AuthorizeOptions {
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    /// Generate a verifier, store it, and send its S256 challenge
    pub use_pkce: bool,
    /// Session key for the verifier; defaults to `idp_pkce_verifier`
    pub verifier_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeExchange {
    pub code: String,
    pub redirect_uri: String,
    /// Must match the key used when the flow was started
    pub verifier_key: Option<String>,
}

impl AuthClient {
    /// Build the authorization URL, persisting a PKCE verifier when requested.
    pub async fn start_oauth2_flow(&self, options: &AuthorizeOptions) -> Result<Url> {
        let client_id = self.require_client_id()?;

        let pkce = options.use_pkce.then(PkcePair::generate);
        if let Some(pkce) = &pkce {
            let key = options.verifier_key.as_deref().unwrap_or(PKCE_VERIFIER_KEY);
            self.session.set(key, pkce.verifier.clone()).await;
        }

        let url = build_authorization_url(
            &endpoint(&self.api_url, AUTHORIZE_PATH),
            &AuthorizeParams {
                client_id,
                redirect_uri: &options.redirect_uri,
                scope: options.scope.as_deref(),
                state: options.state.as_deref(),
                code_challenge: pkce.as_ref().map(|p| p.challenge.as_str()),
            },
        )?;
        debug!(pkce = pkce.is_some(), "oauth2 authorization url built");
        Ok(url)
    }

    /// Exchange an authorization code, store the tokens and load the profile.
    ///
    /// The stored verifier is consumed whether or not the exchange succeeds.
    pub async fn exchange_oauth2_code(&self, exchange: &CodeExchange) -> Result<LoginResult> {
        let client_id = self.require_client_id()?;
        let key = exchange.verifier_key.as_deref().unwrap_or(PKCE_VERIFIER_KEY);
        let verifier = self.session.take(key).await;

        let pair = exchange_code(
            &self.transport,
            &endpoint(&self.api_url, TOKEN_PATH),
            &CodeExchangeParams {
                code: &exchange.code,
                redirect_uri: &exchange.redirect_uri,
                client_id,
                client_secret: self.client_secret.as_ref().map(|s| s.expose().as_str()),
                code_verifier: verifier.as_deref(),
            },
        )
        .await?;

        let result = self.complete_login(pair).await?;
        info!(user_id = %result.user.id, "oauth2 code exchange completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use idp_auth::{ErrorCode, compute_challenge};
    use std::collections::HashMap;
    use transport::RetryPolicy;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AuthClient {
        AuthClient::builder(server.uri())
            .client_id("app-1")
            .retry_policy(RetryPolicy::default().max_retries(0))
            .build()
            .unwrap()
    }

    async fn mount_token_and_profile(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT",
                "token_type": "Bearer",
                "refresh_token": "RT",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "id": "u1" }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn missing_client_id_is_config_error() {
        let client = AuthClient::builder("https://auth.example.com").build().unwrap();
        let err = client
            .start_oauth2_flow(&AuthorizeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);

        let err = client
            .exchange_oauth2_code(&CodeExchange::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
    }

    #[tokio::test]
    async fn authorize_url_without_pkce() {
        let client = AuthClient::builder("https://auth.example.com/")
            .client_id("app-1")
            .build()
            .unwrap();
        let url = client
            .start_oauth2_flow(&AuthorizeOptions {
                redirect_uri: "https://app.example.com/cb".into(),
                scope: Some("profile".into()),
                state: Some("st".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(url.path(), "/oauth/authorize");
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "app-1");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["scope"], "profile");
        assert_eq!(query["state"], "st");
        assert!(!query.contains_key("code_challenge"));
        assert!(client.session.get(PKCE_VERIFIER_KEY).await.is_none());
    }

    #[tokio::test]
    async fn pkce_verifier_is_stored_under_custom_key() {
        let client = AuthClient::builder("https://auth.example.com")
            .client_id("app-1")
            .build()
            .unwrap();
        let url = client
            .start_oauth2_flow(&AuthorizeOptions {
                redirect_uri: "https://app.example.com/cb".into(),
                use_pkce: true,
                verifier_key: Some("my_verifier".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let verifier = client.session.get("my_verifier").await.unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["code_challenge"], compute_challenge(&verifier));
        assert_eq!(query["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn exchange_sends_verifier_once_and_logs_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("code_verifier="))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT",
                "refresh_token": "RT",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "id": "u1" }
            })))
            .mount(&server)
            .await;

        let client = AuthClient::builder(server.uri())
            .client_id("app-1")
            .client_secret(Secret::from("s3cret"))
            .retry_policy(RetryPolicy::default().max_retries(0))
            .build()
            .unwrap();
        client
            .start_oauth2_flow(&AuthorizeOptions {
                redirect_uri: "https://app.example.com/cb".into(),
                use_pkce: true,
                ..Default::default()
            })
            .await
            .unwrap();

        let result = client
            .exchange_oauth2_code(&CodeExchange {
                code: "auth-code".into(),
                redirect_uri: "https://app.example.com/cb".into(),
                verifier_key: None,
            })
            .await
            .unwrap();

        assert_eq!(result.access_token, "AT");
        assert_eq!(result.user.id, "u1");
        assert_eq!(client.get_access_token().await.as_deref(), Some("AT"));
        assert!(client.session.get(PKCE_VERIFIER_KEY).await.is_none());
    }

    #[tokio::test]
    async fn verifier_is_consumed_even_when_exchange_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code already used"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        client.session.set(PKCE_VERIFIER_KEY, "v".into()).await;

        let err = client
            .exchange_oauth2_code(&CodeExchange {
                code: "used".into(),
                redirect_uri: "https://app.example.com/cb".into(),
                verifier_key: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Other("invalid_grant".into()));
        assert_eq!(err.message, "code already used");
        assert!(client.session.get(PKCE_VERIFIER_KEY).await.is_none());
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn exchange_without_pkce_omits_verifier() {
        let server = MockServer::start().await;
        mount_token_and_profile(&server).await;

        let client = client(&server);
        client
            .exchange_oauth2_code(&CodeExchange {
                code: "c".into(),
                redirect_uri: "https://app.example.com/cb".into(),
                verifier_key: None,
            })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let token_request = requests
            .iter()
            .find(|r| r.url.path() == "/oauth/token")
            .unwrap();
        let body = String::from_utf8_lossy(&token_request.body);
        assert!(!body.contains("code_verifier"), "body: {body}");
        assert!(!body.contains("client_secret"), "body: {body}");
    }
}
