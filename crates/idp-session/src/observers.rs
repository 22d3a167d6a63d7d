//! Observer registry for session events
//!
//! Three event kinds: authentication state changes, successful token
//! refreshes, and authentication errors. Observers are called synchronously in
//! registration order. A panicking observer is logged and skipped; it never
//! prevents the remaining observers from running.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use idp_auth::{AuthError, User};
use tracing::warn;

type AuthStateListener = dyn Fn(Option<&User>, bool) + Send + Sync;
type TokenRefreshListener = dyn Fn(&str) + Send + Sync;
type AuthErrorListener = dyn Fn(&AuthError) + Send + Sync;

type Listeners<L> = Mutex<Vec<(Subscription, Arc<L>)>>;

/// Handle returned by every `on_*` registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    auth_state: Listeners<AuthStateListener>,
    token_refresh: Listeners<TokenRefreshListener>,
    auth_error: Listeners<AuthErrorListener>,
}

/// Shared observer lists. Clones refer to the same registry.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<Registry>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("auth_state", &lock(&self.inner.auth_state).len())
            .field("token_refresh", &lock(&self.inner.token_refresh).len())
            .field("auth_error", &lock(&self.inner.auth_error).len())
            .finish()
    }
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(user, authenticated)` after login, logout, and failed refreshes.
    pub fn on_auth_state_change<F>(&self, observer: F) -> Subscription
    where
        F: Fn(Option<&User>, bool) + Send + Sync + 'static,
    {
        let id = self.next_subscription();
        lock(&self.inner.auth_state).push((id, Arc::new(observer)));
        id
    }

    /// Called with the new access token after every successful refresh.
    pub fn on_token_refresh<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.next_subscription();
        lock(&self.inner.token_refresh).push((id, Arc::new(observer)));
        id
    }

    pub fn on_auth_error<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&AuthError) + Send + Sync + 'static,
    {
        let id = self.next_subscription();
        lock(&self.inner.auth_error).push((id, Arc::new(observer)));
        id
    }

    /// Remove a registration. Returns false if it was already removed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        remove(&self.inner.auth_state, subscription)
            || remove(&self.inner.token_refresh, subscription)
            || remove(&self.inner.auth_error, subscription)
    }

    pub fn notify_auth_state(&self, user: Option<&User>, authenticated: bool) {
        fan_out("auth_state", &self.inner.auth_state, |observer| {
            observer(user, authenticated)
        });
    }

    pub fn notify_token_refresh(&self, access_token: &str) {
        fan_out("token_refresh", &self.inner.token_refresh, |observer| {
            observer(access_token)
        });
    }

    pub fn notify_auth_error(&self, error: &AuthError) {
        fan_out("auth_error", &self.inner.auth_error, |observer| observer(error));
    }

    fn next_subscription(&self) -> Subscription {
        Subscription(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove<L: ?Sized>(listeners: &Listeners<L>, subscription: Subscription) -> bool {
    let mut listeners = lock(listeners);
    let before = listeners.len();
    listeners.retain(|(id, _)| *id != subscription);
    listeners.len() != before
}

/// Call every observer on a snapshot of the list so observers may
/// (un)subscribe from inside a callback.
fn fan_out<L: ?Sized>(kind: &'static str, listeners: &Listeners<L>, call: impl Fn(&L)) {
    let snapshot: Vec<Arc<L>> = lock(listeners)
        .iter()
        .map(|(_, observer)| Arc::clone(observer))
        .collect();

    for observer in snapshot {
        if catch_unwind(AssertUnwindSafe(|| call(&*observer))).is_err() {
            warn!(kind, "observer panicked, continuing with the rest");
        }
    }
}
