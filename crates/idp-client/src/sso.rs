//! Cross-domain single sign-on
//!
//! Flow:
//! 1. `login_with_sso` stores a CSRF state (durable channel) and a PKCE
//!    verifier (session channel), then redirects to `{sso_url}/oauth/authorize`
//! 2. The provider redirects back with `code` and `state`
//! 3. `handle_sso_callback` checks the state, exchanges the code at
//!    `{sso_url}/oauth/token`, loads the profile and strips the one-time
//!    parameters from the location
//!
//! Both stored values are read-and-removed by the callback, so a second
//! callback with the same parameters cannot reuse them.
//!
//! Known gap: state validation is skipped when either the stored or the
//! returned state is missing.

use idp_auth::{
    AUTHORIZE_PATH, AuthError, AuthorizeParams, CodeExchangeParams, DEFAULT_SSO_SCOPE,
    ErrorCode, LoginResult, PKCE_VERIFIER_KEY, PkcePair, Result, SSO_STATE_KEY, TOKEN_PATH,
    build_authorization_url, endpoint, exchange_code, generate_state,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::AuthClient;

/// SSO provider settings. Set once per client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SsoConfig {
    pub sso_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_scope() -> String {
    DEFAULT_SSO_SCOPE.to_string()
}

impl SsoConfig {
    pub fn new(
        sso_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            sso_url: sso_url.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: default_scope(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct SsoLoginOptions {
    /// Caller-supplied CSRF state; a random one is generated otherwise
    pub state: Option<String>,
    /// Overrides the configured scope for this attempt
    pub scope: Option<String>,
    pub use_pkce: bool,
}

impl Default for SsoLoginOptions {
    fn default() -> Self {
        Self {
            state: None,
            scope: None,
            use_pkce: true,
        }
    }
}

/// Parameters the provider appends to the redirect URI.
#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match &*key {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

const CALLBACK_PARAMS: [&str; 4] = ["code", "state", "error", "error_description"];

/// `url` without the one-time callback parameters; other parameters are kept.
fn strip_callback_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !CALLBACK_PARAMS.contains(&&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut clean = url.clone();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }
    clean
}

impl AuthClient {
    /// Set the SSO provider. Fails with `CONFIG_ERROR` if already set or invalid.
    pub fn configure_sso(&self, config: SsoConfig) -> Result<()> {
        Url::parse(&config.sso_url)
            .map_err(|e| AuthError::config(format!("invalid sso_url {}: {e}", config.sso_url)))?;
        if config.client_id.is_empty() {
            return Err(AuthError::config("SSO client_id must not be empty"));
        }

        let sso_url = config.sso_url.clone();
        self.sso
            .set(config)
            .map_err(|_| AuthError::config("SSO is already configured"))?;
        info!(sso_url = %sso_url, "sso configured");
        Ok(())
    }

    pub fn sso_config(&self) -> Option<&SsoConfig> {
        self.sso.get()
    }

    fn require_sso(&self) -> Result<&SsoConfig> {
        self.sso.get().ok_or_else(AuthError::sso_not_configured)
    }

    /// Persist state (and the PKCE verifier) and build the authorization URL.
    ///
    /// Does not navigate; see [`AuthClient::login_with_sso`].
    pub async fn sso_authorize_url(&self, options: &SsoLoginOptions) -> Result<Url> {
        let sso = self.require_sso()?;

        let state = options.state.clone().unwrap_or_else(generate_state);
        let pkce = options.use_pkce.then(PkcePair::generate);

        let url = build_authorization_url(
            &endpoint(&sso.sso_url, AUTHORIZE_PATH),
            &AuthorizeParams {
                client_id: &sso.client_id,
                redirect_uri: &sso.redirect_uri,
                scope: Some(options.scope.as_deref().unwrap_or(&sso.scope)),
                state: Some(&state),
                code_challenge: pkce.as_ref().map(|p| p.challenge.as_str()),
            },
        )?;

        self.durable.set(SSO_STATE_KEY, state).await;
        if let Some(pkce) = pkce {
            self.session.set(PKCE_VERIFIER_KEY, pkce.verifier).await;
        }
        debug!(pkce = options.use_pkce, "sso authorization url built");
        Ok(url)
    }

    /// Start an SSO login by redirecting to the provider.
    pub async fn login_with_sso(&self, options: &SsoLoginOptions) -> Result<()> {
        let url = self.sso_authorize_url(options).await?;
        info!(host = url.host_str().unwrap_or_default(), "redirecting to sso provider");
        self.navigator.redirect(&url);
        Ok(())
    }

    /// Whether the current location carries both `code` and `state`.
    pub fn is_sso_callback(&self) -> bool {
        self.navigator.current_url().is_some_and(|url| {
            let params = CallbackParams::from_url(&url);
            params.code.is_some() && params.state.is_some()
        })
    }

    /// Complete an SSO login from the current location.
    pub async fn handle_sso_callback(&self) -> Result<LoginResult> {
        let sso = self.require_sso()?;
        let url = self
            .navigator
            .current_url()
            .ok_or_else(|| AuthError::new(ErrorCode::NoCode, "no callback location"))?;
        let params = CallbackParams::from_url(&url);

        // Single-use regardless of what happens next
        let expected_state = self.durable.take(SSO_STATE_KEY).await;
        let verifier = self.session.take(PKCE_VERIFIER_KEY).await;

        if let Some(error) = params.error {
            let message = params.error_description.unwrap_or_else(|| error.clone());
            warn!(error = %error, "sso provider returned an error");
            return Err(AuthError::new(ErrorCode::from(error.as_str()), message));
        }

        match (&expected_state, &params.state) {
            (Some(expected), Some(actual)) if expected != actual => {
                warn!("sso callback state does not match");
                return Err(AuthError::new(
                    ErrorCode::InvalidState,
                    "callback state does not match the stored state",
                ));
            }
            (Some(_), Some(_)) => {}
            _ => debug!(
                stored = expected_state.is_some(),
                returned = params.state.is_some(),
                "state validation skipped"
            ),
        }

        let code = params
            .code
            .ok_or_else(|| AuthError::new(ErrorCode::NoCode, "callback has no authorization code"))?;

        let pair = exchange_code(
            &self.transport,
            &endpoint(&sso.sso_url, TOKEN_PATH),
            &CodeExchangeParams {
                code: &code,
                redirect_uri: &sso.redirect_uri,
                client_id: &sso.client_id,
                client_secret: self.client_secret.as_ref().map(|s| s.expose().as_str()),
                code_verifier: verifier.as_deref(),
            },
        )
        .await?;

        let result = self.complete_login(pair).await?;
        self.navigator.replace_url(&strip_callback_params(&url));
        info!(user_id = %result.user.id, "sso login completed");
        Ok(result)
    }

    /// Whether an SSO session is present locally.
    ///
    /// Presence check only; no silent re-authentication with the provider.
    pub async fn check_sso_session(&self) -> Result<bool> {
        self.require_sso()?;
        Ok(self.is_authenticated().await)
    }
}
