//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from IDP_CLIENT_SECRET or client_secret_file,
//! never stored in the TOML directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use idp_client::ClientConfig;
use serde::Deserialize;

/// Root configuration: the client settings plus a `[login]` section.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub client: ClientConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

/// Settings of the interactive login command
#[derive(Debug, Deserialize)]
pub struct LoginConfig {
    /// How long `login` waits for the provider to redirect back
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_secs: u64,
    /// Path to a file containing the client secret (alternative to IDP_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

fn default_callback_timeout() -> u64 {
    300
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            callback_timeout_secs: default_callback_timeout(),
            client_secret_file: None,
        }
    }
}

impl LoginConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. IDP_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        config.client.validate()?;

        if config.login.callback_timeout_secs == 0 {
            return Err(common::Error::Config(
                "login.callback_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Ok(secret) = std::env::var("IDP_CLIENT_SECRET") {
            if !secret.is_empty() {
                config.client_secret = Some(Secret::new(secret));
            }
        } else if let Some(ref secret_file) = config.login.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or IDP_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("IDP_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("idp-login.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
api_url = "https://auth.example.com"
client_id = "cli-app"

[storage]
kind = "memory"

[sso]
sso_url = "https://sso.example.com"
client_id = "cli-app"
redirect_uri = "http://127.0.0.1:8765/callback"

[login]
callback_timeout_secs = 120
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("idp-login.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_valid_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.client.api_url, "https://auth.example.com");
        assert_eq!(config.client.client_id.as_deref(), Some("cli-app"));
        assert_eq!(
            config.client.sso.as_ref().unwrap().redirect_uri,
            "http://127.0.0.1:8765/callback"
        );
        assert_eq!(config.login.callback_timeout(), Duration::from_secs(120));
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn test_login_section_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"api_url = "http://localhost:3000""#);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.login.callback_timeout_secs, 300);
        assert!(config.login.client_secret_file.is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/idp-login.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_client_validation_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, r#"api_url = "auth.example.com""#);
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("api_url"), "got: {err}");
    }

    #[test]
    fn test_zero_callback_timeout_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
api_url = "https://auth.example.com"
[login]
callback_timeout_secs = 0
"#,
        );
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("callback_timeout_secs"), "got: {err}");
    }

    #[test]
    fn test_secret_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("IDP_CLIENT_SECRET", "env-secret") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };

        assert_eq!(config.client_secret.unwrap().expose(), "env-secret");
    }

    #[test]
    fn test_secret_from_file_is_trimmed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret\n").unwrap();
        let toml = format!(
            "api_url = \"https://auth.example.com\"\n[login]\nclient_secret_file = \"{}\"\n",
            secret_path.display()
        );
        let path = write_config(&dir, &toml);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.client_secret.unwrap().expose(), "file-secret");
    }

    #[test]
    fn test_env_secret_takes_precedence_over_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "file-secret").unwrap();
        let toml = format!(
            "api_url = \"https://auth.example.com\"\n[login]\nclient_secret_file = \"{}\"\n",
            secret_path.display()
        );
        let path = write_config(&dir, &toml);

        unsafe { set_env("IDP_CLIENT_SECRET", "env-secret") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };

        assert_eq!(config.client_secret.unwrap().expose(), "env-secret");
    }

    #[test]
    fn test_missing_secret_file_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            "api_url = \"https://auth.example.com\"\n[login]\nclient_secret_file = \"/nonexistent/secret\"\n",
        );

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, common::Error::Config(_)), "got: {err:?}");
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("IDP_CLIENT_SECRET", "super-secret-value") };
        let config = Config::load(&path).unwrap();
        unsafe { remove_env("IDP_CLIENT_SECRET") };

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"), "got: {debug}");
    }

    #[test]
    fn test_resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();

        unsafe { set_env("IDP_CONFIG", "/etc/idp/env.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli.toml")),
            PathBuf::from("/cli.toml")
        );
        assert_eq!(
            Config::resolve_path(None),
            PathBuf::from("/etc/idp/env.toml")
        );

        unsafe { remove_env("IDP_CONFIG") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("idp-login.toml"));
    }
}
