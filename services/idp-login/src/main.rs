//! idp-login
//!
//! Command-line host for the identity-provider client:
//! 1. `login`: SSO through the browser with a loopback redirect listener
//! 2. `token`: print a usable access token, refreshing it if needed
//! 3. `whoami`: print the signed-in user's profile
//! 4. `status`: print whether a session is stored and when it expires
//! 5. `logout [--all]`: sign out locally (and everywhere with `--all`)

mod callback;
mod config;
mod error;

use std::sync::Arc;

use anyhow::{Context, Result};
use idp_auth::jwt;
use idp_client::{AuthClient, SsoLoginOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::callback::{CallbackServer, TerminalNavigator};
use crate::config::Config;

const USAGE: &str = "idp-login [--config PATH] <login|token|whoami|status|logout [--all]>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Login,
    Token,
    Whoami,
    Status,
    Logout { all: bool },
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config_path: Option<String>,
    command: Command,
}

/// Simple flag parsing: `--config PATH`, one subcommand, `--all` for logout.
fn parse_args(args: &[String]) -> error::Result<Cli> {
    let mut config_path = None;
    let mut command = None;
    let mut all = false;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| error::Error::Usage("--config needs a path".into()))?;
                config_path = Some(path.clone());
            }
            "--all" => all = true,
            "login" | "token" | "whoami" | "status" | "logout" if command.is_none() => {
                command = Some(arg.as_str());
            }
            other => return Err(error::Error::Usage(format!("unexpected argument {other}; {USAGE}"))),
        }
    }

    let command = match command {
        Some("login") => Command::Login,
        Some("token") => Command::Token,
        Some("whoami") => Command::Whoami,
        Some("status") => Command::Status,
        Some("logout") => Command::Logout { all },
        _ => return Err(error::Error::Usage(USAGE.into())),
    };
    if all && !matches!(command, Command::Logout { .. }) {
        return Err(error::Error::Usage("--all only applies to logout".into()));
    }

    Ok(Cli {
        config_path,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        api_url = %config.client.api_url,
        storage = ?config.client.storage.kind,
        sso = config.client.sso.is_some(),
        "configuration loaded"
    );

    let navigator = Arc::new(TerminalNavigator::new());
    let client = AuthClient::from_config(
        &config.client,
        config.client_secret.clone(),
        navigator.clone(),
    )
    .await
    .context("failed to create client")?;

    match cli.command {
        Command::Login => login(&client, &navigator, &config).await,
        Command::Token => {
            let token = client
                .get_access_token()
                .await
                .ok_or(error::Error::NotSignedIn)?;
            println!("{token}");
            Ok(())
        }
        Command::Whoami => {
            let user = client.get_current_user().await.context("failed to load profile")?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        }
        Command::Status => {
            let token = client.token_manager().storage().get_access().await;
            let status = serde_json::json!({
                "authenticated": token.is_some(),
                "expires_at": token.as_deref().and_then(jwt::expires_at),
                "sso_configured": client.sso_config().is_some(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::Logout { all: false } => {
            client.logout().await;
            println!("Signed out.");
            Ok(())
        }
        Command::Logout { all: true } => {
            client
                .logout_all()
                .await
                .context("failed to sign out everywhere")?;
            println!("Signed out of every session.");
            Ok(())
        }
    }
}

/// Redirect to the provider, wait for the loopback callback, complete the login.
async fn login(client: &AuthClient, navigator: &TerminalNavigator, config: &Config) -> Result<()> {
    let sso = client
        .sso_config()
        .context("login needs an [sso] section in the config file")?;
    let redirect_uri = Url::parse(&sso.redirect_uri).context("invalid sso.redirect_uri")?;

    // Bind before redirecting so a fast provider cannot beat the listener
    let server = CallbackServer::bind(&redirect_uri).await?;
    client
        .login_with_sso(&SsoLoginOptions::default())
        .await
        .context("failed to start sso login")?;

    let callback_url = server.wait(config.login.callback_timeout()).await?;
    navigator.arrive_at(callback_url);

    let result = client
        .handle_sso_callback()
        .await
        .context("sso callback failed")?;
    info!(user_id = %result.user.id, "login complete");
    println!(
        "Signed in as {}.",
        result
            .user
            .email
            .as_deref()
            .or(result.user.username.as_deref())
            .unwrap_or(&result.user.id)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("idp-login")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_command_and_config() {
        let cli = parse_args(&args(&["--config", "/etc/idp.toml", "token"])).unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("/etc/idp.toml"));
        assert_eq!(cli.command, Command::Token);
    }

    #[test]
    fn config_flag_may_follow_command() {
        let cli = parse_args(&args(&["whoami", "--config", "x.toml"])).unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("x.toml"));
        assert_eq!(cli.command, Command::Whoami);
    }

    #[test]
    fn logout_all_flag() {
        assert_eq!(
            parse_args(&args(&["logout", "--all"])).unwrap().command,
            Command::Logout { all: true }
        );
        assert_eq!(
            parse_args(&args(&["logout"])).unwrap().command,
            Command::Logout { all: false }
        );
    }

    #[test]
    fn rejects_missing_or_unknown_command() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["refresh"])).is_err());
        assert!(parse_args(&args(&["token", "status"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
    }

    #[test]
    fn all_flag_only_for_logout() {
        let err = parse_args(&args(&["status", "--all"])).unwrap_err();
        assert!(err.to_string().contains("--all"), "got: {err}");
    }
}
