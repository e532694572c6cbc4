//! Bootstrap helpers.
//!
//! Everything the client keeps on disk lives under `~/.sandbox-session/`.
//! `~/.sandbox-session/.env` is loaded before config resolution so values
//! such as `SANDBOX_API_BASE_URL` can be pinned per machine.

use std::path::{Path, PathBuf};

/// Client home directory: `~/.sandbox-session`.
pub fn sandbox_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandbox-session")
}

/// Path to the client-specific `.env` file: `~/.sandbox-session/.env`.
pub fn sandbox_env_path() -> PathBuf {
    sandbox_home().join(".env")
}

/// Load env vars from `~/.sandbox-session/.env`.
///
/// Call this **after** `dotenvy::dotenv()` so that `./.env` takes priority.
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.sandbox-session/.env`
pub fn load_sandbox_env() {
    load_env_file(&sandbox_env_path());
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}
