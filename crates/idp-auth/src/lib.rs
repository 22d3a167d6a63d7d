//! Identity-provider authentication primitives
//!
//! Building blocks shared by the token lifecycle manager and the client
//! facade: PKCE generation, token endpoint calls, the error taxonomy, the
//! JSON envelope, a best-effort JWT expiry hint, and pluggable token storage.
//!
//! Credential flow:
//! 1. Client builds an authorize URL with `pkce::build_authorization_url()`,
//!    persisting the verifier in a session-scoped `KeyValueStore`
//! 2. The callback code is exchanged with `token::exchange_code()`
//! 3. The pair is saved via `storage::TokenStorage::replace_pair()`
//! 4. `jwt::expires_within()` decides when `token::refresh_token()` runs
//! 5. Logout or a failed refresh calls `storage::TokenStorage::clear()`

pub mod constants;
pub mod envelope;
pub mod error;
pub mod jwt;
pub mod pkce;
pub mod storage;
pub mod token;
pub mod user;

pub use constants::*;
pub use error::{AuthError, ErrorCode, Result};
pub use pkce::{
    AuthorizeParams, PkcePair, build_authorization_url, compute_challenge, generate_state,
    generate_verifier,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SessionStore, StoreFuture, TokenStorage};
pub use token::{CodeExchangeParams, TokenPair, exchange_code, refresh_token};
pub use user::{LoginResult, User};
