//! Command-line errors

use thiserror::Error;

/// Failures of the login host itself. Client failures surface as `AuthError`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("redirect_uri must be a loopback http URL with a port, got: {0}")]
    RedirectNotLoopback(String),

    #[error("callback listener failed: {0}")]
    CallbackServer(String),

    #[error("no callback received within {0}s")]
    CallbackTimeout(u64),

    #[error("not signed in; run `idp-login login` first")]
    NotSignedIn,
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::CallbackTimeout(300).to_string(),
            "no callback received within 300s"
        );
        assert!(
            Error::RedirectNotLoopback("https://app.example.com/cb".into())
                .to_string()
                .contains("https://app.example.com/cb")
        );
        assert!(Error::NotSignedIn.to_string().contains("idp-login login"));
    }
}
