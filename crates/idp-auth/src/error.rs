//! Error taxonomy surfaced to applications
//!
//! Every failure carries a stable machine-readable [`ErrorCode`] so calling
//! UI can branch without parsing message text.

use std::fmt;

/// Stable error codes.
///
/// Codes reported by the server or the identity provider that are not part of
/// this list (e.g. `access_denied`) are carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Missing or invalid client configuration (e.g. no client id)
    ConfigError,
    /// SSO operation before `configure_sso`
    SsoNotConfigured,
    /// Callback state does not match the stored CSRF state
    InvalidState,
    /// Callback without an authorization code
    NoCode,
    /// Operation requires a stored access token
    NotAuthenticated,
    /// Server rejected the refresh token
    RefreshFailed,
    /// Network or decoding failure during refresh
    RefreshError,
    Timeout,
    NetworkError,
    /// Response body was not the expected JSON shape
    InvalidResponse,
    /// Non-success response without a server-provided code
    RequestFailed,
    Other(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::SsoNotConfigured => "SSO_NOT_CONFIGURED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::NoCode => "NO_CODE",
            ErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorCode::RefreshFailed => "REFRESH_FAILED",
            ErrorCode::RefreshError => "REFRESH_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::InvalidResponse => "INVALID_RESPONSE",
            ErrorCode::RequestFailed => "REQUEST_FAILED",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "CONFIG_ERROR" => ErrorCode::ConfigError,
            "SSO_NOT_CONFIGURED" => ErrorCode::SsoNotConfigured,
            "INVALID_STATE" => ErrorCode::InvalidState,
            "NO_CODE" => ErrorCode::NoCode,
            "NOT_AUTHENTICATED" => ErrorCode::NotAuthenticated,
            "REFRESH_FAILED" => ErrorCode::RefreshFailed,
            "REFRESH_ERROR" => ErrorCode::RefreshError,
            "TIMEOUT" => ErrorCode::Timeout,
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "INVALID_RESPONSE" => ErrorCode::InvalidResponse,
            "REQUEST_FAILED" => ErrorCode::RequestFailed,
            other => ErrorCode::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure representation returned by every client operation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status of the response that produced the error, if any
    pub status_code: Option<u16>,
    /// Extra structured context (e.g. the server's original error code)
    pub details: Option<serde_json::Value>,
}

impl AuthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
            details: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn sso_not_configured() -> Self {
        Self::new(
            ErrorCode::SsoNotConfigured,
            "SSO is not configured; call configure_sso first",
        )
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated, "no access token is stored")
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidResponse, message)
    }
}

impl From<transport::Error> for AuthError {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::Timeout(_) => AuthError::new(ErrorCode::Timeout, err.to_string()),
            transport::Error::Http(_) | transport::Error::Build(_) => {
                AuthError::new(ErrorCode::NetworkError, err.to_string())
            }
        }
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
