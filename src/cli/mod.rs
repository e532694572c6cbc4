//! `sandbox-session` command-line interface.
//!
//! Each invocation builds a [`SessionManager`] over the local keystore
//! extension, the HTTP auth gateway and the on-disk token store, runs one
//! command and exits. Sessions survive between invocations through the
//! persisted tokens.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{Error, SessionError};
use crate::gateway::{HttpAuthGateway, RequestLogQuery, SandboxUser};
use crate::session::{FileTokenStore, SessionManager};
use crate::settings::{GatewaySettings, Settings};
use crate::wallet::keystore::{KeystoreExtension, generate_key};
use crate::wallet::{ExtensionRegistry, WalletAccount, WalletOption, WalletProvider};

#[derive(Parser, Debug)]
#[command(name = "sandbox-session")]
#[command(about = "Wallet sign-in and session management for the Sandbox API", version)]
pub struct Cli {
    /// TOML config file (default: ~/.sandbox-session/config.toml)
    #[arg(long, global = true, env = "SANDBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write a starter config file
    Init {
        /// Auth gateway base URL to pin in the file
        #[arg(long)]
        base_url: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List supported wallets and which ones are installed
    Wallets,

    /// Add a new key to the local keystore wallet
    Keygen {
        /// Account name shown in account lists
        #[arg(long)]
        name: String,

        /// Wallet the keystore presents itself as
        #[arg(long, default_value = "polkadot-js")]
        provider: WalletProvider,
    },

    /// Connect a wallet and sign in with a challenge signature
    Login {
        /// Wallet id, e.g. polkadot-js or talisman
        #[arg(long)]
        wallet: String,

        /// Account address or zero-based index when the wallet has several
        #[arg(long)]
        account: Option<String>,
    },

    /// Show the persisted session, if any
    Status,

    /// Exchange the refresh token for a new access token
    Refresh,

    /// Forget the session and clear stored tokens
    Logout,

    /// Issue a new API key
    RegenerateKey,

    /// Show recent API requests
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: u32,

        #[arg(long)]
        offset: Option<u32>,

        /// Only requests to this endpoint
        #[arg(long)]
        endpoint: Option<String>,

        /// Only requests with this HTTP method
        #[arg(long)]
        method: Option<String>,

        /// Only requests that returned this status code
        #[arg(long)]
        status: Option<u16>,
    },

    /// Show aggregate request statistics
    Stats,
}

/// Run one CLI command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Init { base_url, force } = &cli.command {
        return run_init(cli.config.clone(), base_url.clone(), *force);
    }

    let config = Config::from_env_with_toml(cli.config.as_deref())?;
    tracing::debug!(base_url = %config.gateway.base_url, "Configuration loaded");

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Keygen { name, provider } => {
            let account = generate_key(&config.storage.keystore_path, &name, provider).await?;
            println!("Created account {}", account.label());
            println!("  address: {}", account.address);
            println!("  keystore: {}", config.storage.keystore_path.display());
            Ok(())
        }
        command => {
            let manager = build_manager(&config).await?;
            run_session_command(&manager, command).await
        }
    }
}

fn run_init(path: Option<PathBuf>, base_url: Option<String>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(Settings::default_toml_path);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let settings = Settings {
        gateway: GatewaySettings {
            base_url,
            timeout_secs: None,
        },
        ..Default::default()
    };
    settings.save_toml(&path).map_err(anyhow::Error::msg)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Wire the session manager to the keystore, HTTP gateway and token file.
pub async fn build_manager(config: &Config) -> Result<SessionManager, Error> {
    let mut registry = ExtensionRegistry::new();
    if let Some(keystore) = KeystoreExtension::load(&config.storage.keystore_path).await? {
        registry.register(keystore.provider(), Arc::new(keystore));
    }

    let gateway = HttpAuthGateway::new(&config.gateway.base_url, config.gateway.timeout)?;
    let store = FileTokenStore::new(&config.storage.token_path);

    Ok(
        SessionManager::new(registry, Arc::new(gateway), Arc::new(store))
            .with_app_name(config.wallet.app_name.clone()),
    )
}

async fn run_session_command(manager: &SessionManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init { .. } | Command::Keygen { .. } => Ok(()),
        Command::Wallets => {
            for wallet in manager.detect_wallets() {
                let mark = if wallet.installed == Some(true) { "x" } else { " " };
                println!("[{mark}] {:<12} {} ({})", wallet.id, wallet.name, wallet.extension_name);
            }
            Ok(())
        }
        Command::Login { wallet, account } => login(manager, &wallet, account.as_deref()).await,
        Command::Status => match manager.restore_session().await {
            Ok(true) => {
                if let Some(user) = manager.snapshot().user {
                    print_user(&user);
                }
                Ok(())
            }
            Ok(false) => {
                println!("Not logged in.");
                Ok(())
            }
            Err(SessionError::SessionExpired) => {
                println!("Session expired. Run `sandbox-session login` again.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        Command::Refresh => {
            require_session(manager).await?;
            manager.refresh_session().await?;
            println!("Access token refreshed.");
            Ok(())
        }
        Command::Logout => {
            manager.logout().await;
            println!("Logged out.");
            Ok(())
        }
        Command::RegenerateKey => {
            require_session(manager).await?;
            let key = manager.regenerate_api_key().await?;
            println!("New API key: {}", key.api_key);
            println!("Store it now; it will not be shown again.");
            Ok(())
        }
        Command::Logs {
            limit,
            offset,
            endpoint,
            method,
            status,
        } => {
            require_session(manager).await?;
            let query = RequestLogQuery {
                limit: Some(limit),
                offset,
                endpoint,
                method,
                status_code: status,
            };
            let page = manager.request_logs(&query).await?;
            if page.logs.is_empty() {
                println!("No requests recorded.");
            }
            for log in &page.logs {
                println!(
                    "{}  {:<6} {:<32} {:>3}  {:>5}ms{}",
                    log.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    log.method,
                    log.endpoint,
                    log.status_code,
                    log.response_time,
                    log.error_message
                        .as_deref()
                        .map(|m| format!("  {m}"))
                        .unwrap_or_default()
                );
            }
            println!("Showing {} of {} requests", page.logs.len(), page.total);
            Ok(())
        }
        Command::Stats => {
            require_session(manager).await?;
            let stats = manager.request_stats().await?;
            println!("Total requests:   {}", stats.total_requests);
            println!("Successful:       {}", stats.successful_requests);
            println!("Failed:           {}", stats.failed_requests);
            println!("Avg response:     {:.1}ms", stats.average_response_time);
            if !stats.requests_by_endpoint.is_empty() {
                println!("By endpoint:");
                for (endpoint, count) in &stats.requests_by_endpoint {
                    println!("  {endpoint:<32} {count}");
                }
            }
            Ok(())
        }
    }
}

async fn login(
    manager: &SessionManager,
    wallet: &str,
    account: Option<&str>,
) -> anyhow::Result<()> {
    let provider: WalletProvider = wallet.parse().map_err(anyhow::Error::msg)?;
    let option = WalletOption::from(provider);

    // Start from a clean slate so a stale session never blocks connecting.
    manager.logout().await;

    let state = manager.select_wallet(&option).await?;
    println!("Connected {} ({} accounts)", option.name, state.accounts.len());

    if let Some(choice) = account {
        let address = resolve_account(&state.accounts, choice)?;
        manager.select_account(&address).await?;
    } else if state.selected_account.is_none() {
        for (i, account) in state.accounts.iter().enumerate() {
            println!("  [{i}] {}", account.label());
        }
        bail!(
            "{} exposes {} accounts; pass --account ADDRESS|INDEX",
            option.name,
            state.accounts.len()
        );
    }

    let auth = manager.authenticate().await?;
    println!("Signed in.");
    print_user(&auth.user);
    Ok(())
}

/// Accept either a zero-based index into `accounts` or a literal address.
fn resolve_account(accounts: &[WalletAccount], choice: &str) -> anyhow::Result<String> {
    let choice = choice.trim();
    if let Ok(index) = choice.parse::<usize>()
        && !accounts.iter().any(|a| a.address == choice)
    {
        return accounts
            .get(index)
            .map(|a| a.address.clone())
            .with_context(|| {
                format!("account index {index} out of range ({} accounts)", accounts.len())
            });
    }
    Ok(choice.to_string())
}

async fn require_session(manager: &SessionManager) -> anyhow::Result<()> {
    match manager.restore_session().await {
        Ok(true) => Ok(()),
        Ok(false) => bail!("Not logged in. Run `sandbox-session login --wallet <id>` first."),
        Err(e) => Err(e.into()),
    }
}

fn print_user(user: &SandboxUser) {
    println!("Account:  {}", user.polkadot_address);
    println!("Tier:     {}", user.tier);
    println!(
        "Limits:   {}/hour, {}/day, {}/month",
        user.rate_limits.requests_per_hour,
        user.rate_limits.requests_per_day,
        user.rate_limits.requests_per_month
    );
    println!(
        "Usage:    {} this hour, {} today, {} this month",
        user.usage.requests_this_hour, user.usage.requests_today, user.usage.requests_this_month
    );
    if !user.is_active {
        println!("Status:   inactive");
    }
}
