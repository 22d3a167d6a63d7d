//! Browser collaborator for redirect-based flows
//!
//! Flows never touch a real browser. They read the current location, ask for
//! a full-document redirect, or rewrite the location without navigating (to
//! strip one-time callback parameters). Hosts plug in whatever fits: a
//! desktop shell, a loopback listener, or [`MemoryNavigator`] in tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use url::Url;

pub trait Navigator: Send + Sync {
    /// Location the flow is currently "at" (the callback URL after a redirect).
    fn current_url(&self) -> Option<Url>;

    /// Full-document navigation to `url`.
    fn redirect(&self, url: &Url);

    /// Rewrite the current location without navigating.
    fn replace_url(&self, url: &Url);
}

/// Navigator that records redirects and holds the current URL in memory.
#[derive(Debug, Default)]
pub struct MemoryNavigator {
    current: Mutex<Option<Url>>,
    redirects: Mutex<Vec<Url>>,
}

impl MemoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(url: Url) -> Self {
        let navigator = Self::new();
        navigator.set_current(url);
        navigator
    }

    /// Simulate arriving at `url`, e.g. the provider redirecting back.
    pub fn set_current(&self, url: Url) {
        *lock(&self.current) = Some(url);
    }

    pub fn redirects(&self) -> Vec<Url> {
        lock(&self.redirects).clone()
    }

    pub fn last_redirect(&self) -> Option<Url> {
        lock(&self.redirects).last().cloned()
    }
}

impl Navigator for MemoryNavigator {
    fn current_url(&self) -> Option<Url> {
        lock(&self.current).clone()
    }

    fn redirect(&self, url: &Url) {
        lock(&self.redirects).push(url.clone());
    }

    fn replace_url(&self, url: &Url) {
        *lock(&self.current) = Some(url.clone());
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
