//! Bearer token persistence.
//!
//! Tokens are held in memory as [`SecretString`] and persisted as JSON under
//! the constant namespace key [`TOKEN_NAMESPACE`], so the session file can
//! share space with other client state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::TokenStoreError;

/// Storage key for persisted tokens.
pub const TOKEN_NAMESPACE: &str = "sandbox.auth_tokens";

/// Bearer credentials for the auth gateway.
#[derive(Clone)]
pub struct AuthTokens {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Serialized form of [`AuthTokens`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedTokens {
    access_token: String,
    refresh_token: String,
    saved_at: DateTime<Utc>,
}

impl PersistedTokens {
    fn from_tokens(tokens: &AuthTokens) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_string(),
            refresh_token: tokens.refresh_token.expose_secret().to_string(),
            saved_at: Utc::now(),
        }
    }

    fn into_tokens(self) -> Option<AuthTokens> {
        let access = self.access_token.trim();
        let refresh = self.refresh_token.trim();
        if access.is_empty() || refresh.is_empty() {
            return None;
        }
        Some(AuthTokens::new(access, refresh))
    }
}

/// Where the session keeps its tokens between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<AuthTokens>, TokenStoreError>;
    async fn save(&self, tokens: &AuthTokens) -> Result<(), TokenStoreError>;
    async fn clear(&self) -> Result<(), TokenStoreError>;
}

/// In-process token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<AuthTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<AuthTokens>, TokenStoreError> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn save(&self, tokens: &AuthTokens) -> Result<(), TokenStoreError> {
        *self.tokens.lock().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        *self.tokens.lock().await = None;
        Ok(())
    }
}

/// JSON file token store (`~/.sandbox-session/session.json` by default).
///
/// The file is a JSON object; only the [`TOKEN_NAMESPACE`] key is owned by
/// this store and other keys are preserved.
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>, TokenStoreError> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new());
            }
            Err(e) => return Err(e.into()),
        };
        if data.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }
        match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(_) => Err(TokenStoreError::Serialization(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(TokenStoreError::Serialization(format!(
                "invalid JSON in {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_document(
        &self,
        doc: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| TokenStoreError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, json).await?;

        // Restrictive permissions: session file contains secret tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&self.path, perms).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<AuthTokens>, TokenStoreError> {
        let doc = self.read_document().await?;
        let Some(raw) = doc.get(TOKEN_NAMESPACE) else {
            return Ok(None);
        };
        let persisted: PersistedTokens = serde_json::from_value(raw.clone()).map_err(|e| {
            TokenStoreError::Serialization(format!("invalid '{}' entry: {}", TOKEN_NAMESPACE, e))
        })?;
        tracing::debug!(
            "Loaded auth tokens from {} (saved: {})",
            self.path.display(),
            persisted.saved_at
        );
        Ok(persisted.into_tokens())
    }

    async fn save(&self, tokens: &AuthTokens) -> Result<(), TokenStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let value = serde_json::to_value(PersistedTokens::from_tokens(tokens))
            .map_err(|e| TokenStoreError::Serialization(e.to_string()))?;
        doc.insert(TOKEN_NAMESPACE.to_string(), value);
        self.write_document(&doc).await?;
        tracing::debug!("Auth tokens saved to {}", self.path.display());
        Ok(())
    }

    async fn clear(&self) -> Result<(), TokenStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = match self.read_document().await {
            Ok(doc) => doc,
            // A corrupt file holds nothing worth keeping.
            Err(TokenStoreError::Serialization(_)) => serde_json::Map::new(),
            Err(e) => return Err(e),
        };
        doc.remove(TOKEN_NAMESPACE);
        if doc.is_empty() {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            self.write_document(&doc).await?;
        }
        tracing::debug!("Auth tokens cleared from {}", self.path.display());
        Ok(())
    }
}

/// Default token file path (~/.sandbox-session/session.json).
pub fn default_token_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandbox-session")
        .join("session.json")
}
