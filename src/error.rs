//! Error types for the wallet session client.

use regex::Regex;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Errors raised by the wallet session state machine.
///
/// These are the errors surfaced to consumers. Failures of the collaborators
/// (extension, gateway, token store) are folded into this taxonomy by
/// [`SessionError::from_extension`] and [`SessionError::from_gateway`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Wallet extension '{wallet}' is not installed")]
    ExtensionNotFound { wallet: String },

    #[error("Signature rejected: {reason}")]
    SignatureRejected { reason: String },

    #[error("Network error: {reason}")]
    Network { reason: String },

    #[error("Session expired, please sign in again")]
    SessionExpired,

    #[error("Another {operation} operation is already in progress")]
    OperationInProgress { operation: &'static str },

    #[error("Cannot {operation} while session is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: &'static str,
    },

    #[error("Account {address} is not one of the connected accounts")]
    AccountNotFound { address: String },

    #[error("No account selected")]
    NoAccountSelected,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Operation cancelled by logout")]
    Cancelled,

    #[error("Invalid response from auth gateway: {reason}")]
    InvalidResponse { reason: String },

    #[error("Token storage failed: {reason}")]
    Storage { reason: String },
}

impl SessionError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtensionNotFound { .. } => "extension_not_found",
            Self::SignatureRejected { .. } => "signature_rejected",
            Self::Network { .. } => "network",
            Self::SessionExpired => "session_expired",
            Self::OperationInProgress { .. } => "operation_in_progress",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::AccountNotFound { .. } => "account_not_found",
            Self::NoAccountSelected => "no_account_selected",
            Self::NotAuthenticated => "not_authenticated",
            Self::Cancelled => "cancelled",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Storage { .. } => "storage",
        }
    }

    /// Map an extension failure raised while listing accounts.
    pub(crate) fn from_extension(err: ExtensionError) -> Self {
        match err {
            ExtensionError::Rejected(reason) => Self::SignatureRejected {
                reason: redact_sensitive_detail(&reason),
            },
            ExtensionError::NoAccounts => Self::Network {
                reason: "extension returned no accounts".to_string(),
            },
            ExtensionError::Unavailable(reason) => Self::Network {
                reason: redact_sensitive_detail(&reason),
            },
        }
    }

    /// Map a gateway failure. `verifying` marks the signature verification
    /// call, where a 4xx means the signature itself was refused.
    pub(crate) fn from_gateway(err: GatewayError, verifying: bool) -> Self {
        match err {
            GatewayError::Network(reason) => Self::Network {
                reason: redact_sensitive_detail(&reason),
            },
            GatewayError::Unauthorized if verifying => Self::SignatureRejected {
                reason: "auth gateway refused the signature".to_string(),
            },
            GatewayError::Unauthorized => Self::SessionExpired,
            GatewayError::Rejected { status, message } if verifying && status < 500 => {
                Self::SignatureRejected {
                    reason: redact_sensitive_detail(&message),
                }
            }
            GatewayError::Rejected { status, message } => Self::Network {
                reason: format!("HTTP {}: {}", status, redact_sensitive_detail(&message)),
            },
            GatewayError::InvalidResponse(reason) => Self::InvalidResponse {
                reason: redact_sensitive_detail(&reason),
            },
        }
    }
}

impl From<TokenStoreError> for SessionError {
    fn from(err: TokenStoreError) -> Self {
        Self::Storage {
            reason: err.to_string(),
        }
    }
}

/// Errors raised by a wallet extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("Request rejected by user: {0}")]
    Rejected(String),

    #[error("Extension returned no accounts")]
    NoAccounts,

    #[error("Extension unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the auth gateway client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Gateway returned HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Token persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mask bearer tokens, api keys and similar secrets in free-form error text.
pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    let patterns = [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(access_?token|refresh_?token|token|api[_\-]?key|secret)\b(\s*[:=]\s*)([^,\s]+)",
            "$1$2[REDACTED]",
        ),
        (r"(?i)\bsk_(live|test)_[a-z0-9]{8,}\b", "sk_$1_[REDACTED]"),
    ];

    for (pattern, replacement) in patterns {
        if let Ok(re) = Regex::new(pattern) {
            value = re.replace_all(&value, replacement).to_string();
        }
    }

    value
}
