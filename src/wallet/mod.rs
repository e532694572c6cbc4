//! Supported browser wallets and the accounts they expose.
//!
//! The catalog is static: every wallet the dashboard knows how to talk to is a
//! variant of [`WalletProvider`]. Whether a wallet is actually usable is only
//! known at runtime, by probing the [`ExtensionRegistry`].

pub mod extension;
pub mod keystore;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use self::extension::{ExtensionRegistry, WalletExtension};
pub use self::keystore::KeystoreExtension;

/// Closed set of wallet extensions the session client supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WalletProvider {
    PolkadotJs,
    Talisman,
    SubWallet,
    Nova,
    Enkrypt,
    PolkaGate,
    Fearless,
}

impl WalletProvider {
    pub const ALL: [WalletProvider; 7] = [
        Self::PolkadotJs,
        Self::Talisman,
        Self::SubWallet,
        Self::Nova,
        Self::Enkrypt,
        Self::PolkaGate,
        Self::Fearless,
    ];

    /// Catalog id used by the dashboard (`WalletOption::id`).
    pub fn id(self) -> &'static str {
        match self {
            Self::PolkadotJs => "polkadot-js",
            Self::Talisman => "talisman",
            Self::SubWallet => "subwallet",
            Self::Nova => "nova",
            Self::Enkrypt => "enkrypt",
            Self::PolkaGate => "polkagate",
            Self::Fearless => "fearless",
        }
    }

    /// Key under which the extension injects itself.
    ///
    /// Nova Wallet's in-app browser injects under the polkadot-js key.
    pub fn extension_name(self) -> &'static str {
        match self {
            Self::PolkadotJs | Self::Nova => "polkadot-js",
            Self::Talisman => "talisman",
            Self::SubWallet => "subwallet-js",
            Self::Enkrypt => "enkrypt",
            Self::PolkaGate => "polkagate",
            Self::Fearless => "fearless-wallet",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::PolkadotJs => "Polkadot.js",
            Self::Talisman => "Talisman",
            Self::SubWallet => "SubWallet",
            Self::Nova => "Nova Wallet",
            Self::Enkrypt => "Enkrypt",
            Self::PolkaGate => "PolkaGate",
            Self::Fearless => "Fearless Wallet",
        }
    }

    fn logo(self) -> &'static str {
        match self {
            Self::PolkadotJs => "/wallets/polkadot-js.svg",
            Self::Talisman => "/wallets/talisman.svg",
            Self::SubWallet => "/wallets/subwallet.svg",
            Self::Nova => "/wallets/nova.svg",
            Self::Enkrypt => "/wallets/enkrypt.svg",
            Self::PolkaGate => "/wallets/polkagate.svg",
            Self::Fearless => "/wallets/fearless.svg",
        }
    }
}

impl fmt::Display for WalletProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for WalletProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', ' ', '.'], "-");
        match normalized.as_str() {
            "polkadot-js" | "polkadotjs" | "polkadot" => Ok(Self::PolkadotJs),
            "talisman" => Ok(Self::Talisman),
            "subwallet" | "subwallet-js" => Ok(Self::SubWallet),
            "nova" | "nova-wallet" => Ok(Self::Nova),
            "enkrypt" => Ok(Self::Enkrypt),
            "polkagate" => Ok(Self::PolkaGate),
            "fearless" | "fearless-wallet" => Ok(Self::Fearless),
            _ => Err(format!("unknown wallet '{}'", value.trim())),
        }
    }
}

/// Catalog entry for a supported browser wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletOption {
    pub id: String,
    pub name: String,
    pub extension_name: String,
    pub logo: String,
    /// Computed at runtime; `None` until the registry has been probed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<bool>,
}

impl WalletOption {
    pub fn provider(&self) -> Option<WalletProvider> {
        self.id.parse().ok()
    }
}

impl From<WalletProvider> for WalletOption {
    fn from(provider: WalletProvider) -> Self {
        Self {
            id: provider.id().to_string(),
            name: provider.display_name().to_string(),
            extension_name: provider.extension_name().to_string(),
            logo: provider.logo().to_string(),
            installed: None,
        }
    }
}

/// The wallets offered on the connect screen, in display order.
pub fn common_wallets() -> Vec<WalletOption> {
    WalletProvider::ALL
        .iter()
        .copied()
        .map(WalletOption::from)
        .collect()
}

/// An account exposed by a wallet extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extension name the account was read from.
    pub source: String,
}

impl WalletAccount {
    pub fn new(address: impl Into<String>, name: Option<&str>, provider: WalletProvider) -> Self {
        Self {
            address: address.into(),
            name: name.map(str::to_string),
            source: provider.extension_name().to_string(),
        }
    }

    /// Short human label, e.g. `Alice (0x02ab…9f1c)`.
    pub fn label(&self) -> String {
        let short = shorten_address(&self.address);
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => format!("{} ({})", name.trim(), short),
            _ => short,
        }
    }
}

fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 14 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
