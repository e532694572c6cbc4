//! Wallet extension capability interface and the registry of installed ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExtensionError;
use crate::wallet::{WalletAccount, WalletOption, WalletProvider};

/// What the session needs from an injected wallet: enumerate accounts and
/// sign raw payloads with one of them.
#[async_trait]
pub trait WalletExtension: Send + Sync {
    /// Enable the extension for `app_name` and return its accounts.
    async fn list_accounts(&self, app_name: &str) -> Result<Vec<WalletAccount>, ExtensionError>;

    /// Sign `payload` with `account`, returning a 0x-prefixed hex signature.
    async fn sign_raw(
        &self,
        account: &WalletAccount,
        payload: &str,
    ) -> Result<String, ExtensionError>;
}

/// Installed wallet extensions, keyed by provider.
///
/// A provider is "installed" exactly when an extension is registered for it.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<WalletProvider, Arc<dyn WalletExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: WalletProvider, extension: Arc<dyn WalletExtension>) {
        tracing::debug!(wallet = %provider, "Registered wallet extension");
        self.extensions.insert(provider, extension);
    }

    pub fn with(mut self, provider: WalletProvider, extension: Arc<dyn WalletExtension>) -> Self {
        self.register(provider, extension);
        self
    }

    pub fn get(&self, provider: WalletProvider) -> Option<Arc<dyn WalletExtension>> {
        self.extensions.get(&provider).cloned()
    }

    pub fn is_installed(&self, provider: WalletProvider) -> bool {
        self.extensions.contains_key(&provider)
    }

    pub fn installed(&self) -> Vec<WalletProvider> {
        self.extensions.keys().copied().collect()
    }

    /// Fill in `installed` for every catalog entry.
    pub fn detect(&self, catalog: &[WalletOption]) -> Vec<WalletOption> {
        catalog
            .iter()
            .map(|option| {
                let installed = option
                    .provider()
                    .map(|provider| self.is_installed(provider))
                    .unwrap_or(false);
                WalletOption {
                    installed: Some(installed),
                    ..option.clone()
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("installed", &self.installed())
            .finish()
    }
}
