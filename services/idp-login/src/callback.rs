//! Loopback redirect listener for the interactive login
//!
//! Binds the host/port of the configured redirect URI, waits for the provider
//! to redirect the browser back, and hands the full callback URL to the
//! client's navigator. The listener serves exactly one callback.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use idp_client::{MemoryNavigator, Navigator};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};

const DONE_PAGE: &str = "<!doctype html><title>Signed in</title>\
<p>Sign-in complete. You can close this window and return to the terminal.</p>";

/// Navigator for a terminal session: redirects are printed for the user to
/// open, the current location is whatever the callback listener received.
#[derive(Debug, Default)]
pub struct TerminalNavigator {
    inner: MemoryNavigator,
}

impl TerminalNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arrive_at(&self, url: Url) {
        self.inner.set_current(url);
    }
}

impl Navigator for TerminalNavigator {
    fn current_url(&self) -> Option<Url> {
        self.inner.current_url()
    }

    fn redirect(&self, url: &Url) {
        println!("Open this URL in your browser to sign in:\n\n  {url}\n");
        self.inner.redirect(url);
    }

    fn replace_url(&self, url: &Url) {
        debug!(%url, "callback location cleaned");
        self.inner.replace_url(url);
    }
}

/// Address to bind for `redirect_uri`. Only loopback http URLs are accepted.
pub fn bind_addr(redirect_uri: &Url) -> Result<SocketAddr> {
    let reject = || Error::RedirectNotLoopback(redirect_uri.to_string());

    if redirect_uri.scheme() != "http" {
        return Err(reject());
    }
    let port = redirect_uri.port().ok_or_else(reject)?;
    let ip = match redirect_uri.host_str().ok_or_else(reject)? {
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        host => host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| reject())?,
    };
    if !ip.is_loopback() {
        return Err(reject());
    }
    Ok(SocketAddr::new(ip, port))
}

#[derive(Clone)]
struct CallbackState {
    base: Url,
    sender: Arc<Mutex<Option<oneshot::Sender<Url>>>>,
}

/// A bound listener waiting for one redirect.
pub struct CallbackServer {
    listener: TcpListener,
    base: Url,
}

impl CallbackServer {
    pub async fn bind(redirect_uri: &Url) -> Result<Self> {
        let addr = bind_addr(redirect_uri)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::CallbackServer(format!("failed to bind to {addr}: {e}")))?;
        Ok(Self::from_listener(listener, redirect_uri.clone()))
    }

    pub fn from_listener(listener: TcpListener, redirect_uri: Url) -> Self {
        let mut base = redirect_uri;
        base.set_query(None);
        base.set_fragment(None);
        Self { listener, base }
    }

    /// Serve until the first request on the redirect path, then shut down.
    ///
    /// Returns the callback URL with the provider's query parameters.
    pub async fn wait(self, timeout: Duration) -> Result<Url> {
        let (tx, rx) = oneshot::channel();
        let state = CallbackState {
            base: self.base.clone(),
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        let app = Router::new()
            .route(self.base.path(), get(callback_handler))
            .with_state(state);

        let addr = self
            .listener
            .local_addr()
            .map_err(|e| Error::CallbackServer(e.to_string()))?;
        info!(%addr, path = self.base.path(), "waiting for sso callback");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let received = tokio::time::timeout(timeout, rx).await;
        let _ = shutdown_tx.send(());
        if let Err(e) = server.await {
            warn!(error = %e, "callback server task panicked");
        }

        match received {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(_)) => Err(Error::CallbackServer("callback channel closed".into())),
            Err(_) => Err(Error::CallbackTimeout(timeout.as_secs())),
        }
    }
}

async fn callback_handler(
    State(state): State<CallbackState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let mut url = state.base.clone();
    url.set_query(query.as_deref());

    let sender = state
        .sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    match sender {
        Some(sender) => {
            let _ = sender.send(url);
        }
        None => debug!("ignoring repeated callback"),
    }
    Html(DONE_PAGE)
}
