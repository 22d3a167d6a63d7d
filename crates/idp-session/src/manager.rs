//! Access token lifecycle with single-flight refresh
//!
//! `get_access_token` decodes the stored JWT's `exp` claim (unverified) and
//! refreshes when it falls inside [`REFRESH_WINDOW`]. Tokens that are not
//! decodable JWTs are returned unchanged; the server stays the authority.
//!
//! At most one refresh request is in flight per manager. Concurrent callers
//! await the same shared future and all observe its result. The future clears
//! its own slot on completion, so the next expiry starts a fresh request.
//!
//! Every session change (a new pair or a clear) bumps a generation counter.
//! A refresh only commits its outcome if the generation it started under is
//! still current, so a logout during an in-flight refresh stays logged out.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use idp_auth::{AuthError, ErrorCode, TokenPair, TokenStorage, User, jwt, token};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use transport::HttpTransport;

use crate::metrics;
use crate::observers::Observers;

/// Refresh when the access token expires within this window.
pub const REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// Owns the stored token pair and the current user.
///
/// Cheap to clone; clones share storage, observers and the in-flight refresh.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
    refresh_window: Duration,
}

struct Inner {
    storage: TokenStorage,
    transport: HttpTransport,
    refresh_url: String,
    observers: Observers,
    current_user: RwLock<Option<User>>,
    in_flight: Mutex<Option<RefreshFuture>>,
    generation: Mutex<u64>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("refresh_url", &self.inner.refresh_url)
            .field("refresh_window", &self.refresh_window)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        storage: TokenStorage,
        transport: HttpTransport,
        refresh_url: impl Into<String>,
        observers: Observers,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                transport,
                refresh_url: refresh_url.into(),
                observers,
                current_user: RwLock::new(None),
                in_flight: Mutex::new(None),
                generation: Mutex::new(0),
            }),
            refresh_window: REFRESH_WINDOW,
        }
    }

    pub fn with_refresh_window(mut self, window: Duration) -> Self {
        self.refresh_window = window;
        self
    }

    pub fn storage(&self) -> &TokenStorage {
        &self.inner.storage
    }

    pub fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    /// Return a usable access token, refreshing first if it is about to expire.
    ///
    /// `None` when nothing is stored, or when the refresh failed (storage has
    /// been cleared by then).
    pub async fn get_access_token(&self) -> Option<String> {
        let token = self.inner.storage.get_access().await?;
        let now = chrono::Utc::now().timestamp();
        let window = self.refresh_window.as_secs() as i64;

        match jwt::expires_within(&token, now, window) {
            Some(true) => {
                debug!("access token expires soon, refreshing");
                self.refresh().await;
                self.inner.storage.get_access().await
            }
            Some(false) => Some(token),
            None => {
                debug!("access token has no readable exp claim, using as-is");
                Some(token)
            }
        }
    }

    /// Refresh the token pair. Joins an in-flight refresh if one exists.
    ///
    /// Returns true when the new pair was stored.
    pub async fn refresh(&self) -> bool {
        let pending = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight token refresh");
                    pending.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let pending = async move {
                        let refreshed = inner.refresh_once().await;
                        inner.in_flight.lock().await.take();
                        refreshed
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Presence check only; expiry is not inspected.
    pub async fn is_authenticated(&self) -> bool {
        self.inner.storage.get_access().await.is_some()
    }

    /// Replace the session with a freshly issued pair.
    ///
    /// The pair replaces the previous one in a single write, so a pair
    /// without a refresh token never inherits the old one.
    pub async fn set_session(&self, pair: &TokenPair, user: Option<User>) {
        self.store_pair(pair).await;
        self.mark_authenticated(user);
    }

    /// Replace the stored pair without notifying observers.
    pub async fn store_pair(&self, pair: &TokenPair) {
        let mut generation = self.inner.generation.lock().await;
        *generation += 1;
        self.inner.storage.replace_pair(pair).await;
    }

    /// Cache `user` and notify observers that the session is authenticated.
    pub fn mark_authenticated(&self, user: Option<User>) {
        self.set_current_user(user.clone());
        info!(user_id = user.as_ref().map(|u| u.id.as_str()), "session established");
        self.inner.observers.notify_auth_state(user.as_ref(), true);
    }

    /// Drop all tokens and the current user, then notify observers.
    pub async fn clear_session(&self) {
        {
            let mut generation = self.inner.generation.lock().await;
            *generation += 1;
            self.inner.storage.clear().await;
        }
        self.set_current_user(None);
        info!("session cleared");
        self.inner.observers.notify_auth_state(None, false);
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.current_user()
    }

    pub fn set_current_user(&self, user: Option<User>) {
        *self
            .inner
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = user;
    }
}

impl Inner {
    fn current_user(&self) -> Option<User> {
        self.current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn refresh_once(&self) -> bool {
        let started = *self.generation.lock().await;
        let Some(refresh) = self.storage.get_refresh().await else {
            self.fail(
                started,
                AuthError::new(ErrorCode::RefreshFailed, "no refresh token is stored"),
            )
            .await;
            return false;
        };

        match token::refresh_token(&self.transport, &self.refresh_url, &refresh).await {
            Ok(pair) => {
                {
                    let generation = self.generation.lock().await;
                    if *generation != started {
                        debug!("session changed during refresh, discarding new tokens");
                        metrics::record_refresh("superseded");
                        return false;
                    }
                    self.storage.set_pair(&pair).await;
                }
                metrics::record_refresh("success");
                info!("access token refreshed");
                self.observers.notify_token_refresh(&pair.access_token);
                self.observers
                    .notify_auth_state(self.current_user().as_ref(), true);
                true
            }
            Err(e) => {
                self.fail(started, e).await;
                false
            }
        }
    }

    /// Fail closed: a refresh that did not succeed leaves no tokens behind.
    ///
    /// A session replaced while the refresh ran is left alone.
    async fn fail(&self, started: u64, error: AuthError) {
        {
            let generation = self.generation.lock().await;
            if *generation != started {
                debug!(code = %error.code, "session changed during refresh, ignoring failure");
                metrics::record_refresh("superseded");
                return;
            }
            warn!(code = %error.code, error = %error.message, "token refresh failed, clearing session");
            self.storage.clear().await;
        }
        *self
            .current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let outcome = match error.code {
            ErrorCode::RefreshFailed => "rejected",
            _ => "error",
        };
        metrics::record_refresh(outcome);

        self.observers.notify_auth_error(&error);
        self.observers.notify_auth_state(None, false);
    }
}
