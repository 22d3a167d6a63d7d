//! Client configuration loaded from TOML
//!
//! ```toml
//! api_url = "https://auth.example.com"
//! client_id = "my-app"
//!
//! [http]
//! max_retries = 3
//!
//! [storage]
//! kind = "durable"
//! path = "credentials.json"
//!
//! [sso]
//! sso_url = "https://sso.example.com"
//! client_id = "my-app"
//! redirect_uri = "http://127.0.0.1:8765/callback"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use idp_auth::{FileStore, KeyValueStore, MemoryStore, SessionStore};
use serde::Deserialize;
use transport::{DEFAULT_RETRYABLE_STATUSES, RetryPolicy};

use crate::client::Stores;
use crate::sso::SsoConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the authentication server
    pub api_url: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub sso: Option<SsoConfig>,
}

/// Retry and timeout settings for every request
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

/// Where the token pair lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// File that survives restarts
    #[default]
    Durable,
    /// Per-session file, discarded when the session ends
    Session,
    /// Process memory only; nothing touches the disk
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    #[serde(default = "default_session_dir")]
    pub session_dir: PathBuf,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_session_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_session_id() -> String {
    "default".into()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_ms: default_timeout_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            path: default_storage_path(),
            session_dir: default_session_dir(),
            session_id: default_session_id(),
        }
    }
}

impl HttpSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .max_retries(self.max_retries)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .timeout(Duration::from_millis(self.timeout_ms))
            .retryable_statuses(self.retryable_statuses.iter().copied())
    }
}

impl StorageSettings {
    /// Open the durable and session channels and pick the token store.
    ///
    /// `memory` keeps every channel in process memory.
    pub async fn open(&self) -> Stores {
        if self.kind == StorageKind::Memory {
            return Stores::memory();
        }

        let durable: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&self.path).await);
        let session: Arc<dyn KeyValueStore> =
            Arc::new(SessionStore::open(&self.session_dir, &self.session_id).await);
        let tokens = match self.kind {
            StorageKind::Session => Arc::clone(&session),
            _ => Arc::clone(&durable),
        };

        Stores {
            tokens,
            durable,
            session,
        }
    }

    /// Memory-only variant of these settings.
    pub fn memory() -> Self {
        Self {
            kind: StorageKind::Memory,
            ..Self::default()
        }
    }
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        require_http_url("api_url", &self.api_url)?;

        if self.http.timeout_ms == 0 {
            return Err(common::Error::Config(
                "http.timeout_ms must be greater than 0".into(),
            ));
        }

        if self.client_id.as_deref() == Some("") {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if let Some(sso) = &self.sso {
            require_http_url("sso.sso_url", &sso.sso_url)?;
            require_http_url("sso.redirect_uri", &sso.redirect_uri)?;
            if sso.client_id.is_empty() {
                return Err(common::Error::Config(
                    "sso.client_id must not be empty".into(),
                ));
            }
        }

        if self.storage.kind == StorageKind::Session && self.storage.session_id.is_empty() {
            return Err(common::Error::Config(
                "storage.session_id must not be empty".into(),
            ));
        }

        Ok(())
    }
}

fn require_http_url(field: &str, value: &str) -> common::Result<()> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}
