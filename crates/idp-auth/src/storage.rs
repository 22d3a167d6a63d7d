//! Pluggable key/value persistence for tokens and pending flow state
//!
//! Three interchangeable backends implement [`KeyValueStore`]:
//! - [`FileStore`]: durable JSON file, survives restarts
//! - [`SessionStore`]: file scoped to one session id, discarded by `end()`
//! - [`MemoryStore`]: volatile, lives as long as the value
//!
//! Stores never fail from the caller's point of view. An unreadable or
//! unwritable medium is logged and treated as empty (reads) or a no-op
//! (persistence), so an unavailable disk degrades to "not logged in" instead
//! of breaking the application.
//!
//! [`TokenStorage`] layers the access/refresh token contract on top of any store.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::token::TokenPair;

/// Boxed future returned by store operations (dyn-compatible trait methods).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async key/value store contract.
///
/// Multi-key operations are applied under one lock and persisted in one
/// write, so observers never see a partially applied update.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Read and remove `key` in one step (single-use values).
    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Insert `set` and drop `remove` as one update.
    fn update<'a>(
        &'a self,
        set: &'a [(&'a str, String)],
        remove: &'a [&'a str],
    ) -> StoreFuture<'a, ()>;

    fn set_many<'a>(&'a self, entries: &'a [(&'a str, String)]) -> StoreFuture<'a, ()> {
        self.update(entries, &[])
    }

    fn remove_many<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        self.update(&[], keys)
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entries = [(key, value)];
            self.set_many(&entries).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let keys = [key];
            self.remove_many(&keys).await
        })
    }
}

/// Volatile in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { self.entries.lock().await.get(key).cloned() })
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { self.entries.lock().await.remove(key) })
    }

    fn update<'a>(
        &'a self,
        set: &'a [(&'a str, String)],
        remove: &'a [&'a str],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            apply(&mut *self.entries.lock().await, set, remove);
        })
    }
}

/// Durable store backed by a JSON file.
///
/// The in-memory map is authoritative for reads; every mutation rewrites the
/// file atomically (temp file + rename, mode 0600 on unix). If the file
/// cannot be written the mutation still applies in memory and a warning is
/// logged.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and also starts empty; it is overwritten on the next mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(entries) => {
                    info!(path = %path.display(), entries = entries.len(), "loaded token store");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "token store is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "token store not found, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "token store unreadable, starting empty");
                HashMap::new()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every entry and delete the backing file.
    pub async fn discard(&self) {
        let mut state = self.state.lock().await;
        state.clear();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "discarded store file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete store file"),
        }
    }

    async fn persist(&self, state: &HashMap<String, String>) {
        if let Err(e) = write_atomic(&self.path, state).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist store, keeping in memory only");
        }
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { self.state.lock().await.get(key).cloned() })
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let value = state.remove(key);
            if value.is_some() {
                self.persist(&state).await;
            }
            value
        })
    }

    fn update<'a>(
        &'a self,
        set: &'a [(&'a str, String)],
        remove: &'a [&'a str],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if apply(&mut state, set, remove) {
                self.persist(&state).await;
            }
        })
    }
}

/// Store scoped to one session id.
///
/// Entries live in `<dir>/session-<id>.json`: they survive re-creating the
/// client with the same session id (a reload) and are discarded by
/// [`SessionStore::end`].
#[derive(Debug)]
pub struct SessionStore {
    inner: FileStore,
}

impl SessionStore {
    pub async fn open(dir: impl AsRef<Path>, session_id: &str) -> Self {
        let id: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dir.as_ref().join(format!("session-{id}.json"));
        Self {
            inner: FileStore::open(path).await,
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// End the session: all entries are dropped and the file is deleted.
    pub async fn end(&self) {
        self.inner.discard().await;
    }
}

impl KeyValueStore for SessionStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        self.inner.get(key)
    }

    fn take<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        self.inner.take(key)
    }

    fn update<'a>(
        &'a self,
        set: &'a [(&'a str, String)],
        remove: &'a [&'a str],
    ) -> StoreFuture<'a, ()> {
        self.inner.update(set, remove)
    }
}

/// Apply an update to a map. Returns whether anything changed.
fn apply(state: &mut HashMap<String, String>, set: &[(&str, String)], remove: &[&str]) -> bool {
    let mut changed = false;
    for key in remove {
        changed |= state.remove(*key).is_some();
    }
    for (key, value) in set {
        changed |= state.insert((*key).to_owned(), value.clone()).as_ref() != Some(value);
    }
    changed
}

/// Write entries to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets permissions to 0600 since the file holds tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(data)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;
    debug!(path = %path.display(), "persisted store");
    Ok(())
}

/// Access/refresh token contract over any [`KeyValueStore`].
#[derive(Clone)]
pub struct TokenStorage {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStorage {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get_access(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY).await
    }

    pub async fn set_access(&self, token: &str) {
        self.store.set(ACCESS_TOKEN_KEY, token.to_owned()).await
    }

    pub async fn get_refresh(&self) -> Option<Secret<String>> {
        self.store.get(REFRESH_TOKEN_KEY).await.map(Secret::new)
    }

    pub async fn set_refresh(&self, token: &Secret<String>) {
        self.store
            .set(REFRESH_TOKEN_KEY, token.expose().clone())
            .await
    }

    /// Store a freshly issued pair in one write.
    ///
    /// When the server did not rotate the refresh token, the stored one is kept.
    pub async fn set_pair(&self, pair: &TokenPair) {
        let mut entries = vec![(ACCESS_TOKEN_KEY, pair.access_token.clone())];
        if let Some(refresh) = &pair.refresh_token {
            entries.push((REFRESH_TOKEN_KEY, refresh.expose().clone()));
        }
        self.store.set_many(&entries).await
    }

    /// Replace the whole pair in one write.
    ///
    /// Unlike [`set_pair`](Self::set_pair), a pair without a refresh token
    /// drops the stored one.
    pub async fn replace_pair(&self, pair: &TokenPair) {
        let mut set = vec![(ACCESS_TOKEN_KEY, pair.access_token.clone())];
        let mut remove = Vec::new();
        match &pair.refresh_token {
            Some(refresh) => set.push((REFRESH_TOKEN_KEY, refresh.expose().clone())),
            None => remove.push(REFRESH_TOKEN_KEY),
        }
        self.store.update(&set, &remove).await
    }

    /// Remove both tokens in one operation.
    pub async fn clear(&self) {
        self.store
            .remove_many(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
            .await
    }
}

impl std::fmt::Debug for TokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStorage").finish_non_exhaustive()
    }
}
