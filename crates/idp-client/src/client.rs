//! `AuthClient`: the application-facing entry point
//!
//! One client owns its configuration, stores, transport, token manager and
//! observers. Nothing is global; two clients in one process are independent.

use std::sync::{Arc, OnceLock};

use common::Secret;
use idp_auth::{
    AuthError, CURRENT_USER_PATH, KeyValueStore, LOGIN_EMAIL_PATH, LOGIN_PASSWORD_PATH,
    LOGIN_PHONE_PATH, LOGOUT_ALL_PATH, LOGOUT_PATH, LoginResult, MemoryStore, REFRESH_PATH,
    Result, SEND_CODE_PATH, TokenPair, TokenStorage, User, endpoint, envelope,
};
use idp_session::{Observers, Subscription, TokenManager};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use transport::{HttpTransport, RetryPolicy};
use url::Url;

use crate::config::ClientConfig;
use crate::navigation::{MemoryNavigator, Navigator};
use crate::sso::SsoConfig;

/// The storage channels a client writes to.
///
/// - `tokens`: the access/refresh pair
/// - `durable`: survives restarts (CSRF state)
/// - `session`: scoped to the current session (PKCE verifier)
#[derive(Clone)]
pub struct Stores {
    pub tokens: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
    pub session: Arc<dyn KeyValueStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Self {
            tokens: Arc::clone(&durable),
            durable,
            session: Arc::new(MemoryStore::new()),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Channel for a one-time login code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeChannel {
    Phone,
    Email,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendCodeRequest {
    /// Phone number or email address
    pub target: String,
    pub channel: CodeChannel,
    /// What the code is for (`login`, `register`, `reset_password`, ...)
    pub purpose: String,
}

/// Login response data: the user plus a token pair.
#[derive(Deserialize)]
struct LoginData {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
}

pub struct AuthClientBuilder {
    api_url: String,
    client_id: Option<String>,
    client_secret: Option<Secret<String>>,
    policy: RetryPolicy,
    http_client: Option<reqwest::Client>,
    stores: Option<Stores>,
    navigator: Option<Arc<dyn Navigator>>,
    sso: Option<SsoConfig>,
}

impl AuthClientBuilder {
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, secret: Secret<String>) -> Self {
        self.client_secret = Some(secret);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reuse an existing `reqwest::Client`.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Configure SSO at build time instead of via [`AuthClient::configure_sso`].
    pub fn sso(mut self, config: SsoConfig) -> Self {
        self.sso = Some(config);
        self
    }

    pub fn build(self) -> Result<AuthClient> {
        Url::parse(&self.api_url)
            .map_err(|e| AuthError::config(format!("invalid api_url {}: {e}", self.api_url)))?;

        let transport = match self.http_client {
            Some(client) => HttpTransport::with_client(client, self.policy),
            None => HttpTransport::new(self.policy),
        };
        let stores = self.stores.unwrap_or_else(Stores::memory);
        let observers = Observers::new();
        let tokens = TokenManager::new(
            TokenStorage::new(Arc::clone(&stores.tokens)),
            transport.clone(),
            endpoint(&self.api_url, REFRESH_PATH),
            observers,
        );

        let client = AuthClient {
            api_url: self.api_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            transport,
            tokens,
            durable: stores.durable,
            session: stores.session,
            navigator: self
                .navigator
                .unwrap_or_else(|| Arc::new(MemoryNavigator::new())),
            sso: OnceLock::new(),
        };

        if let Some(sso) = self.sso {
            client.configure_sso(sso)?;
        }
        Ok(client)
    }
}

/// Identity-provider client.
pub struct AuthClient {
    pub(crate) api_url: String,
    pub(crate) client_id: Option<String>,
    pub(crate) client_secret: Option<Secret<String>>,
    pub(crate) transport: HttpTransport,
    pub(crate) tokens: TokenManager,
    pub(crate) durable: Arc<dyn KeyValueStore>,
    pub(crate) session: Arc<dyn KeyValueStore>,
    pub(crate) navigator: Arc<dyn Navigator>,
    pub(crate) sso: OnceLock<SsoConfig>,
}

impl std::fmt::Debug for AuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthClient")
            .field("api_url", &self.api_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("sso", &self.sso.get())
            .finish_non_exhaustive()
    }
}

impl AuthClient {
    pub fn builder(api_url: impl Into<String>) -> AuthClientBuilder {
        AuthClientBuilder {
            api_url: api_url.into(),
            client_id: None,
            client_secret: None,
            policy: RetryPolicy::default(),
            http_client: None,
            stores: None,
            navigator: None,
            sso: None,
        }
    }

    /// Build a client from a loaded config, opening its stores.
    pub async fn from_config(
        config: &ClientConfig,
        client_secret: Option<Secret<String>>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let mut builder = Self::builder(&config.api_url)
            .retry_policy(config.http.retry_policy())
            .stores(config.storage.open().await)
            .navigator(navigator);
        if let Some(client_id) = &config.client_id {
            builder = builder.client_id(client_id);
        }
        if let Some(secret) = client_secret {
            builder = builder.client_secret(secret);
        }
        if let Some(sso) = &config.sso {
            builder = builder.sso(sso.clone());
        }
        builder.build()
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    // -- Application endpoints --

    /// Ask the server to send a one-time code by SMS or email.
    pub async fn send_code(&self, request: &SendCodeRequest) -> Result<()> {
        debug!(channel = ?request.channel, purpose = %request.purpose, "requesting login code");
        let response = self
            .transport
            .send(
                self.transport
                    .request(Method::POST, &endpoint(&self.api_url, SEND_CODE_PATH))
                    .json(request),
            )
            .await?;
        envelope::read_ack(response).await
    }

    pub async fn login_with_phone(&self, phone: &str, code: &str) -> Result<LoginResult> {
        self.login(
            LOGIN_PHONE_PATH,
            serde_json::json!({ "phone": phone, "code": code }),
        )
        .await
    }

    pub async fn login_with_email(&self, email: &str, code: &str) -> Result<LoginResult> {
        self.login(
            LOGIN_EMAIL_PATH,
            serde_json::json!({ "email": email, "code": code }),
        )
        .await
    }

    /// `account` is a username, email or phone number.
    pub async fn login_with_password(&self, account: &str, password: &str) -> Result<LoginResult> {
        self.login(
            LOGIN_PASSWORD_PATH,
            serde_json::json!({ "account": account, "password": password }),
        )
        .await
    }

    async fn login(&self, path: &str, body: serde_json::Value) -> Result<LoginResult> {
        let response = self
            .transport
            .send(
                self.transport
                    .request(Method::POST, &endpoint(&self.api_url, path))
                    .json(&body),
            )
            .await?;
        let data: LoginData = envelope::read_data(response).await?;

        self.tokens
            .set_session(&data.tokens, Some(data.user.clone()))
            .await;
        info!(path, user_id = %data.user.id, "login succeeded");

        Ok(LoginResult {
            user: data.user,
            access_token: data.tokens.access_token,
            expires_in: data.tokens.expires_in,
        })
    }

    /// Fetch the profile of the signed-in user and cache it.
    pub async fn get_current_user(&self) -> Result<User> {
        let token = self
            .get_access_token()
            .await
            .ok_or_else(AuthError::not_authenticated)?;
        let user = self.fetch_user(&token).await?;
        self.tokens.set_current_user(Some(user.clone()));
        Ok(user)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User> {
        let response = self
            .transport
            .send(
                self.transport
                    .request(Method::GET, &endpoint(&self.api_url, CURRENT_USER_PATH))
                    .bearer_auth(access_token),
            )
            .await?;
        envelope::read_data(response).await
    }

    /// Sign out locally. The server call is best-effort and never fails the logout.
    pub async fn logout(&self) {
        if let Some(token) = self.tokens.storage().get_access().await {
            let request = self
                .transport
                .request(Method::POST, &endpoint(&self.api_url, LOGOUT_PATH))
                .bearer_auth(token);
            let result = match self.transport.send(request).await {
                Ok(response) => envelope::read_ack(response).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                warn!(code = %e.code, error = %e.message, "server logout failed, clearing local session anyway");
            }
        }
        self.tokens.clear_session().await;
    }

    /// Revoke every session of the user on the server, then sign out locally.
    ///
    /// The local session is cleared even when the server call fails; that
    /// failure is still returned.
    pub async fn logout_all(&self) -> Result<()> {
        let token = self
            .get_access_token()
            .await
            .ok_or_else(AuthError::not_authenticated)?;

        let request = self
            .transport
            .request(Method::POST, &endpoint(&self.api_url, LOGOUT_ALL_PATH))
            .bearer_auth(token);
        let result = match self.transport.send(request).await {
            Ok(response) => envelope::read_ack(response).await,
            Err(e) => Err(e.into()),
        };

        self.tokens.clear_session().await;
        result
    }

    // -- Token state --

    /// A usable access token, silently refreshed when it is about to expire.
    pub async fn get_access_token(&self) -> Option<String> {
        self.tokens.get_access_token().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    /// Last user seen by a login or [`AuthClient::get_current_user`].
    pub fn current_user(&self) -> Option<User> {
        self.tokens.current_user()
    }

    // -- Observers --

    pub fn on_auth_state_change<F>(&self, observer: F) -> Subscription
    where
        F: Fn(Option<&User>, bool) + Send + Sync + 'static,
    {
        self.tokens.observers().on_auth_state_change(observer)
    }

    pub fn on_token_refresh<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.tokens.observers().on_token_refresh(observer)
    }

    pub fn on_auth_error<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&AuthError) + Send + Sync + 'static,
    {
        self.tokens.observers().on_auth_error(observer)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.tokens.observers().unsubscribe(subscription)
    }

    // -- Shared by the redirect flows --

    pub(crate) fn require_client_id(&self) -> Result<&str> {
        match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(AuthError::config("client_id is not configured")),
        }
    }

    /// Store an exchanged pair, fetch the profile, then notify observers.
    ///
    /// Tokens stay stored if the profile fetch fails; the error is returned.
    pub(crate) async fn complete_login(&self, pair: TokenPair) -> Result<LoginResult> {
        self.tokens.store_pair(&pair).await;
        let user = self.fetch_user(&pair.access_token).await.map_err(|e| {
            warn!(code = %e.code, error = %e.message, "profile fetch after code exchange failed");
            e
        })?;
        self.tokens.mark_authenticated(Some(user.clone()));

        Ok(LoginResult {
            user,
            access_token: pair.access_token,
            expires_in: pair.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idp_auth::ErrorCode;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> AuthClient {
        AuthClient::builder(server.uri())
            .client_id("app-1")
            .retry_policy(RetryPolicy::default().max_retries(0))
            .build()
            .unwrap()
    }

    fn login_ok(access: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "data": {
                "user": { "id": "u1", "email": "a@example.com" },
                "access_token": access,
                "refresh_token": "rt",
                "expires_in": 3600
            }
        }))
    }

    fn ack() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true }))
    }

    #[test]
    fn invalid_api_url_is_config_error() {
        let err = AuthClient::builder("not a url").build().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
    }

    #[tokio::test]
    async fn send_code_posts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/send-code"))
            .and(body_json(serde_json::json!({
                "target": "+15550100",
                "channel": "phone",
                "purpose": "login"
            })))
            .respond_with(ack())
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_code(&SendCodeRequest {
                target: "+15550100".into(),
                channel: CodeChannel::Phone,
                purpose: "login".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_code_surfaces_server_error_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "success": false,
                "error": { "code": "RATE_LIMITED", "message": "slow down" }
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_code(&SendCodeRequest {
                target: "a@example.com".into(),
                channel: CodeChannel::Email,
                purpose: "login".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Other("RATE_LIMITED".into()));
        assert_eq!(err.status_code, Some(429));
    }

    #[tokio::test]
    async fn password_login_stores_tokens_and_notifies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/password"))
            .and(body_json(serde_json::json!({ "account": "alice", "password": "pw" })))
            .respond_with(login_ok("at1"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        client.on_auth_state_change(move |user, authenticated| {
            sink.lock()
                .unwrap()
                .push((user.map(|u| u.id.clone()), authenticated))
        });

        let result = client.login_with_password("alice", "pw").await.unwrap();
        assert_eq!(result.user.id, "u1");
        assert_eq!(result.access_token, "at1");
        assert_eq!(result.expires_in, Some(3600));

        assert!(client.is_authenticated().await);
        assert_eq!(client.current_user().unwrap().email.as_deref(), Some("a@example.com"));
        assert_eq!(
            client.token_manager().storage().get_refresh().await.unwrap().expose(),
            "rt"
        );
        assert_eq!(*states.lock().unwrap(), vec![(Some("u1".to_string()), true)]);
    }

    #[tokio::test]
    async fn phone_and_email_logins_hit_their_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/phone"))
            .and(body_json(serde_json::json!({ "phone": "+15550100", "code": "123456" })))
            .respond_with(login_ok("at_phone"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/email"))
            .and(body_json(serde_json::json!({ "email": "a@example.com", "code": "654321" })))
            .respond_with(login_ok("at_email"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let phone = client.login_with_phone("+15550100", "123456").await.unwrap();
        assert_eq!(phone.access_token, "at_phone");
        let email = client.login_with_email("a@example.com", "654321").await.unwrap();
        assert_eq!(email.access_token, "at_email");
        assert_eq!(client.get_access_token().await.as_deref(), Some("at_email"));
    }

    #[tokio::test]
    async fn failed_login_leaves_state_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "success": false,
                "error": { "code": "INVALID_CREDENTIALS", "message": "wrong password" }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.login_with_password("alice", "bad").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Other("INVALID_CREDENTIALS".into()));
        assert_eq!(err.message, "wrong password");
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn get_current_user_requires_token() {
        let server = MockServer::start().await;
        let err = client(&server).get_current_user().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAuthenticated);
    }

    #[tokio::test]
    async fn get_current_user_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/password"))
            .respond_with(login_ok("at1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .and(header("authorization", "Bearer at1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "id": "u1", "nickname": "Al", "tenant": "acme" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.login_with_password("alice", "pw").await.unwrap();
        let user = client.get_current_user().await.unwrap();

        assert_eq!(user.nickname.as_deref(), Some("Al"));
        assert_eq!(user.extra["tenant"], "acme");
        assert_eq!(client.current_user().unwrap().nickname.as_deref(), Some("Al"));
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/password"))
            .respond_with(login_ok("at1"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.login_with_password("alice", "pw").await.unwrap();
        client.logout().await;

        assert!(!client.is_authenticated().await);
        assert!(client.current_user().is_none());
        assert!(client.token_manager().storage().get_refresh().await.is_none());
    }

    #[tokio::test]
    async fn logout_without_session_skips_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ack())
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = states.clone();
        client.on_auth_state_change(move |_, authenticated| sink.lock().unwrap().push(authenticated));

        client.logout().await;
        assert_eq!(*states.lock().unwrap(), vec![false]);
    }

    #[tokio::test]
    async fn logout_all_requires_token() {
        let server = MockServer::start().await;
        let err = client(&server).logout_all().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAuthenticated);
    }

    #[tokio::test]
    async fn logout_all_revokes_and_clears() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login/password"))
            .respond_with(login_ok("at1"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout-all"))
            .and(header("authorization", "Bearer at1"))
            .respond_with(ack())
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.login_with_password("alice", "pw").await.unwrap();
        client.logout_all().await.unwrap();
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn unsubscribe_through_facade() {
        let server = MockServer::start().await;
        let client = client(&server);
        let sub = client.on_token_refresh(|_| {});
        assert!(client.unsubscribe(sub));
        assert!(!client.unsubscribe(sub));
    }

    #[tokio::test]
    async fn clients_do_not_share_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(login_ok("at1"))
            .mount(&server)
            .await;

        let a = client(&server);
        let b = client(&server);
        a.login_with_password("alice", "pw").await.unwrap();

        assert!(a.is_authenticated().await);
        assert!(!b.is_authenticated().await);
    }
}
