//! Configuration for sandbox-session.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `./.env` and `~/.sandbox-session/.env` are loaded via dotenvy first, so
//! values pinned there behave like env vars.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api/sandbox";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_APP_NAME: &str = "Sandbox Dashboard";

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
    pub wallet: WalletConfig,
}

/// Auth gateway connection.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// On-disk state locations.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub token_path: PathBuf,
    pub keystore_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub app_name: String,
}

impl GatewayConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw = optional_env("SANDBOX_API_BASE_URL")?
            .or_else(|| settings.gateway.base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let base_url = validate_base_url("SANDBOX_API_BASE_URL", &raw)?;

        let default_timeout = settings
            .gateway
            .timeout_secs
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let timeout_secs: u64 = parse_optional_env("SANDBOX_HTTP_TIMEOUT_SECS", default_timeout)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SANDBOX_HTTP_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl StorageConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let token_path = optional_env("SANDBOX_TOKEN_PATH")?
            .map(PathBuf::from)
            .or_else(|| settings.storage.token_path.clone())
            .unwrap_or_else(crate::session::tokens::default_token_path);
        let keystore_path = optional_env("SANDBOX_KEYSTORE_PATH")?
            .map(PathBuf::from)
            .or_else(|| settings.storage.keystore_path.clone())
            .unwrap_or_else(crate::wallet::keystore::default_keystore_path);

        Ok(Self {
            token_path: expand_home(&token_path),
            keystore_path: expand_home(&keystore_path),
        })
    }
}

impl WalletConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let app_name = optional_env("SANDBOX_APP_NAME")?
            .or_else(|| settings.wallet.app_name.clone())
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        Ok(Self { app_name })
    }
}

/// Accept only absolute http(s) URLs; strips a trailing slash.
fn validate_base_url(key: &str, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{trimmed}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected http or https, got '{other}'"),
            });
        }
    }
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{trimmed}' has no host"),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}

impl Config {
    /// Load configuration from env vars and the default TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_sandbox_env();
        let mut settings = Settings::default();
        Self::apply_toml_overlay(&mut settings, toml_path)?;
        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries `~/.sandbox-session/config.toml` (a missing file is
    /// ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Resolve every section from settings plus env.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve(settings)?,
            storage: StorageConfig::resolve(settings)?,
            wallet: WalletConfig::resolve(settings)?,
        })
    }
}
