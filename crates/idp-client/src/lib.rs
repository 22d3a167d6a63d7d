//! Identity-provider client
//!
//! Authenticates end users against a remote authentication service and keeps
//! the resulting credentials usable:
//! - code and password logins against the application endpoints
//! - direct OAuth2 authorization-code flow with optional PKCE
//! - cross-domain SSO with CSRF state and PKCE
//! - silent, deduplicated token refresh (see `idp_session`)
//!
//! ```no_run
//! # async fn run() -> idp_auth::Result<()> {
//! use idp_client::{AuthClient, SsoConfig, SsoLoginOptions};
//!
//! let client = AuthClient::builder("https://auth.example.com")
//!     .client_id("my-app")
//!     .build()?;
//! client.configure_sso(SsoConfig::new(
//!     "https://sso.example.com",
//!     "my-app",
//!     "http://127.0.0.1:8765/callback",
//! ))?;
//! client.login_with_sso(&SsoLoginOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod navigation;
pub mod oauth2;
pub mod sso;

pub use client::{AuthClient, AuthClientBuilder, CodeChannel, SendCodeRequest, Stores};
pub use config::{ClientConfig, HttpSettings, StorageKind, StorageSettings};
pub use idp_auth::{AuthError, ErrorCode, LoginResult, Result, User};
pub use idp_session::Subscription;
pub use navigation::{MemoryNavigator, Navigator};
pub use oauth2::{AuthorizeOptions, CodeExchange};
pub use sso::{SsoConfig, SsoLoginOptions};
