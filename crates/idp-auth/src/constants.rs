//! Well-known storage keys, endpoint paths, and protocol defaults
//!
//! Keys are medium-agnostic: the same names are used whether the backing
//! store is a file, a session directory, or memory.

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "idp_access_token";

/// Storage key for the refresh token (never returned to callers)
pub const REFRESH_TOKEN_KEY: &str = "idp_refresh_token";

/// Default session-channel key for a pending PKCE verifier
pub const PKCE_VERIFIER_KEY: &str = "idp_pkce_verifier";

/// Durable-channel key for the pending SSO CSRF state
pub const SSO_STATE_KEY: &str = "idp_sso_state";

/// Scope requested by SSO logins unless configured otherwise
pub const DEFAULT_SSO_SCOPE: &str = "openid profile email";

/// OAuth2 authorization endpoint, relative to the API or SSO base URL
pub const AUTHORIZE_PATH: &str = "/oauth/authorize";

/// OAuth2 token endpoint, relative to the API or SSO base URL
pub const TOKEN_PATH: &str = "/oauth/token";

/// Application endpoints (JSON envelope), relative to the API base URL
pub const SEND_CODE_PATH: &str = "/api/auth/send-code";
pub const LOGIN_PHONE_PATH: &str = "/api/auth/login/phone";
pub const LOGIN_EMAIL_PATH: &str = "/api/auth/login/email";
pub const LOGIN_PASSWORD_PATH: &str = "/api/auth/login/password";
pub const REFRESH_PATH: &str = "/api/auth/refresh";
pub const LOGOUT_PATH: &str = "/api/auth/logout";
pub const LOGOUT_ALL_PATH: &str = "/api/auth/logout-all";
pub const CURRENT_USER_PATH: &str = "/api/auth/me";

/// Join a base URL and an absolute path without doubling the slash.
pub fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
