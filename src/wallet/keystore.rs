//! File-backed keystore that stands in for a browser extension.
//!
//! Keys are secp256k1. An account's address is the 0x-prefixed compressed
//! public key (the form Substrate uses for ECDSA accounts). Raw payloads are
//! wrapped in `<Bytes>` markers, hashed with Keccak-256 and signed with a
//! recoverable signature, giving a 65-byte `r || s || v` hex string.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::ExtensionError;
use crate::wallet::{WalletAccount, WalletExtension, WalletProvider};

const BYTES_PREFIX: &str = "<Bytes>";
const BYTES_SUFFIX: &str = "</Bytes>";

/// On-disk keystore layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    /// Which catalog wallet this keystore answers for.
    pub provider: WalletProvider,
    #[serde(default)]
    pub accounts: Vec<KeystoreEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreEntry {
    pub name: String,
    /// Hex-encoded 32-byte secret key.
    pub secret_key: String,
}

struct LoadedKey {
    account: WalletAccount,
    key: SigningKey,
}

/// Keystore-backed [`WalletExtension`].
pub struct KeystoreExtension {
    provider: WalletProvider,
    keys: Vec<LoadedKey>,
}

impl KeystoreExtension {
    pub fn from_file(file: &KeystoreFile) -> Result<Self, ExtensionError> {
        let mut keys = Vec::with_capacity(file.accounts.len());
        for entry in &file.accounts {
            let bytes = decode_hex(&entry.secret_key).map_err(|e| {
                ExtensionError::Unavailable(format!("keystore entry '{}': {}", entry.name, e))
            })?;
            let key = SigningKey::from_slice(&bytes).map_err(|e| {
                ExtensionError::Unavailable(format!("keystore entry '{}': {}", entry.name, e))
            })?;
            let address = address_from_verifying_key(key.verifying_key());
            keys.push(LoadedKey {
                account: WalletAccount::new(address, Some(&entry.name), file.provider),
                key,
            });
        }
        Ok(Self {
            provider: file.provider,
            keys,
        })
    }

    /// Load a keystore file. A missing file means the extension is not installed.
    pub async fn load(path: &Path) -> Result<Option<Self>, ExtensionError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ExtensionError::Unavailable(format!(
                    "failed to read keystore {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let file: KeystoreFile = serde_json::from_str(&data).map_err(|e| {
            ExtensionError::Unavailable(format!("invalid keystore {}: {}", path.display(), e))
        })?;
        tracing::debug!(
            "Loaded keystore {} ({} accounts)",
            path.display(),
            file.accounts.len()
        );
        Self::from_file(&file).map(Some)
    }

    pub fn provider(&self) -> WalletProvider {
        self.provider
    }

    pub fn accounts(&self) -> Vec<WalletAccount> {
        self.keys.iter().map(|k| k.account.clone()).collect()
    }
}

#[async_trait]
impl WalletExtension for KeystoreExtension {
    async fn list_accounts(&self, app_name: &str) -> Result<Vec<WalletAccount>, ExtensionError> {
        tracing::debug!(app = app_name, wallet = %self.provider, "Keystore enabled");
        if self.keys.is_empty() {
            return Err(ExtensionError::NoAccounts);
        }
        Ok(self.accounts())
    }

    async fn sign_raw(
        &self,
        account: &WalletAccount,
        payload: &str,
    ) -> Result<String, ExtensionError> {
        let loaded = self
            .keys
            .iter()
            .find(|k| k.account.address == account.address)
            .ok_or_else(|| {
                ExtensionError::Rejected(format!("unknown account {}", account.address))
            })?;
        sign_payload(&loaded.key, payload)
    }
}

/// Append a freshly generated key to the keystore at `path`, creating the
/// file if needed. Returns the new account.
pub async fn generate_key(
    path: &Path,
    name: &str,
    provider: WalletProvider,
) -> Result<WalletAccount, ExtensionError> {
    let io_err = |e: std::io::Error| {
        ExtensionError::Unavailable(format!("keystore {}: {}", path.display(), e))
    };

    let mut file = match tokio::fs::read_to_string(path).await {
        Ok(data) => serde_json::from_str::<KeystoreFile>(&data).map_err(|e| {
            ExtensionError::Unavailable(format!("invalid keystore {}: {}", path.display(), e))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => KeystoreFile {
            provider,
            accounts: Vec::new(),
        },
        Err(e) => return Err(io_err(e)),
    };

    let key = SigningKey::random(&mut rand::rngs::OsRng);
    let address = address_from_verifying_key(key.verifying_key());
    file.accounts.push(KeystoreEntry {
        name: name.to_string(),
        secret_key: encode_hex(&key.to_bytes()),
    });

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| ExtensionError::Unavailable(format!("serialize keystore: {}", e)))?;
    tokio::fs::write(path, json).await.map_err(io_err)?;

    // Keystore holds private keys
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }

    Ok(WalletAccount::new(address, Some(name), file.provider))
}

/// Default keystore path (~/.sandbox-session/keystore.json).
pub fn default_keystore_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandbox-session")
        .join("keystore.json")
}

/// Wrap a payload the way extensions do before raw signing.
pub fn wrap_bytes(payload: &str) -> String {
    if payload.starts_with(BYTES_PREFIX) && payload.ends_with(BYTES_SUFFIX) {
        return payload.to_string();
    }
    format!("{BYTES_PREFIX}{payload}{BYTES_SUFFIX}")
}

fn payload_hash(payload: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(wrap_bytes(payload).as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn sign_payload(key: &SigningKey, payload: &str) -> Result<String, ExtensionError> {
    let prehash = payload_hash(payload);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(&prehash)
        .map_err(|e| ExtensionError::Unavailable(format!("signing failed: {e}")))?;
    let mut out = signature.to_bytes().to_vec();
    out.push(recovery_id.to_byte());
    Ok(format!("0x{}", encode_hex(&out)))
}

/// Check that `signature_hex` over `payload` was produced by `address`.
pub fn verify_raw_signature(
    payload: &str,
    signature_hex: &str,
    address: &str,
) -> Result<(), String> {
    let bytes = decode_hex(signature_hex)?;
    if bytes.len() != 65 {
        return Err("signature must decode to 65 bytes".to_string());
    }
    let signature = Signature::try_from(&bytes[..64])
        .map_err(|e| format!("invalid ECDSA signature bytes: {e}"))?;
    let recovery_id = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        _ => return Err("signature recovery id must be 0/1 or 27/28".to_string()),
    };
    let recovery_id = RecoveryId::try_from(recovery_id)
        .map_err(|_| "signature recovery id is invalid".to_string())?;
    let recovered =
        VerifyingKey::recover_from_prehash(&payload_hash(payload), &signature, recovery_id)
            .map_err(|e| format!("failed recovering signer from signature: {e}"))?;

    if address_from_verifying_key(&recovered) != address.trim().to_ascii_lowercase() {
        return Err("signature does not match address".to_string());
    }
    Ok(())
}

fn address_from_verifying_key(key: &VerifyingKey) -> String {
    format!("0x{}", encode_hex(key.to_encoded_point(true).as_bytes()))
}

fn decode_hex(value: &str) -> Result<Vec<u8>, String> {
    let trimmed = value.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex.is_empty() {
        return Err("hex string is empty".to_string());
    }
    if hex.len() % 2 != 0 {
        return Err("hex string must have an even number of characters".to_string());
    }
    hex.as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16);
            let lo = (pair[1] as char).to_digit(16);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok(((hi << 4) | lo) as u8),
                _ => Err("invalid hex character".to_string()),
            }
        })
        .collect()
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
